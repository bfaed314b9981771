//! FIFO stores backing the queue.
//!
//! A store only needs O(1) amortized `push` and `pop_front`, so that
//! `enqueue` does not degrade as the queue grows under sustained submission.
//! The default [`LinkedStore`] is a singly linked list threaded through an
//! index arena; any other [`Store`] can be plugged in through a
//! [`StoreFactory`] passed at queue construction.
use crate::queue::Entry;
use once_cell::sync::Lazy;
use std::{collections::VecDeque, sync::Arc};


/// Ordered container of pending values.
pub trait Store<T>: Send {
    /// Appends `value` at the back. Returns the new length.
    fn push(&mut self, value: T) -> usize;
    /// Removes the value at the front, if any.
    fn pop_front(&mut self) -> Option<T>;
    /// Number of stored values.
    fn len(&self) -> usize;
    /// Checks if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> Store<T> for VecDeque<T> {
    fn push(&mut self, value: T) -> usize {
        self.push_back(value);
        VecDeque::len(self)
    }
    fn pop_front(&mut self) -> Option<T> {
        VecDeque::pop_front(self)
    }
    fn len(&self) -> usize {
        VecDeque::len(self)
    }
}

/// Constructs the store of a new queue.
pub type StoreFactory = Arc<dyn Send + Sync + Fn() -> Box<dyn Store<Entry>>>;

/// Builds a factory producing `S::default()`.
pub fn factory<S: 'static + Default + Store<Entry>>() -> StoreFactory {
    Arc::new(|| Box::new(S::default()))
}

static DEFAULT_FACTORY: Lazy<StoreFactory> = Lazy::new(factory::<LinkedStore<Entry>>);

/// Factory used by queues constructed without an explicit one.
pub fn default_factory() -> StoreFactory {
    DEFAULT_FACTORY.clone()
}

/// Number of slots an emptied list keeps allocated.
const RETAINED_SLOTS: usize = 64;

/// Slot of the arena. Free slots have `value == None`.
#[derive(Debug)]
struct Node<T> {
    value: Option<T>,
    next: Option<usize>,
}

/// Singly linked list with head and tail links, allocated in an index arena.
///
/// Popped slots go to a free list and are reused by later pushes. Once the
/// list empties, the arena is reset and shrunk, so that a burst of values
/// doesn't keep its memory allocated after it has been drained.
#[derive(Debug)]
pub struct LinkedStore<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Default for LinkedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkedStore<T> {
    /// Constructs an empty list.
    pub fn new() -> Self {
        Self {
            nodes: vec![],
            free: vec![],
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Allocates a slot holding `value`.
    fn alloc(&mut self, value: T) -> usize {
        let node = Node {
            value: Some(value),
            next: None,
        };
        match self.free.pop() {
            Some(i) => {
                self.nodes[i] = node;
                i
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }
}

impl<T: Send> Store<T> for LinkedStore<T> {
    fn push(&mut self, value: T) -> usize {
        let i = self.alloc(value);
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(i),
            None => self.head = Some(i),
        }
        self.tail = Some(i);
        self.len += 1;
        self.len
    }

    fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        let node = &mut self.nodes[head];
        let value = node.value.take();
        self.head = node.next.take();
        self.len -= 1;
        if self.head.is_none() {
            self.tail = None;
            self.nodes.clear();
            self.free.clear();
            self.nodes.shrink_to(RETAINED_SLOTS);
            self.free.shrink_to(RETAINED_SLOTS);
        } else {
            self.free.push(head);
        }
        value
    }

    fn len(&self) -> usize {
        self.len
    }
}
