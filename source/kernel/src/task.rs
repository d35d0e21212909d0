//! Cooperative tasks with message mailboxes.
//!
//! A [`Task`] is a handler plus a FIFO mailbox of [`Message`]s. Tasks are
//! registered with a [`Dispatcher`], and every call to
//! [`Dispatcher::dispatch_once`] walks the registered tasks in registration
//! order, offering each task the messages waiting in its mailbox.
//!
//! The handler answers each message with a [`Verdict`]:
//!
//! * [`Verdict::Consumed`]: the message is removed from the mailbox and
//!   freed, and the next message is offered.
//! * [`Verdict::Saved`]: the message stays at the head of the mailbox, and
//!   the task gets no more messages until the next pass. This is the only
//!   form of backpressure: a saved message blocks everything queued behind
//!   it.
//!
//! Messages may be sent from interrupt handlers. Every mailbox and registry
//! mutation runs inside a critical section; handlers themselves run outside
//! of it.

use alloc::{boxed::Box, sync::Arc};
use core::{
    cell::{RefCell, UnsafeCell},
    fmt,
    ops::Deref,
    ptr::{addr_of_mut, NonNull},
};

use critical_section::Mutex;
use ember_list::{Linked, Links, List};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{isr, message::Message, MessageBox};

/// What a [`Handler`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The message was handled and may be freed.
    Consumed,
    /// The message can't be handled yet. Leave it (and everything behind it)
    /// queued until the next pass.
    Saved,
}

/// Handles the messages sent to a [`Task`].
pub trait Handler: Send {
    fn handle(&mut self, msg: &Message) -> Verdict;
}

impl<F> Handler for F
where
    F: FnMut(&Message) -> Verdict + Send,
{
    fn handle(&mut self, msg: &Message) -> Verdict {
        self(msg)
    }
}

/// A task: a message handler and its mailbox.
pub struct Task {
    links: Links<Task>,
    name: &'static str,
    mailbox: Mutex<RefCell<List<Message>>>,
    /// Only touched while `busy` is held.
    handler: UnsafeCell<Box<dyn Handler>>,
    busy: AtomicBool,
    /// Id of the dispatcher this task is registered with, or `UNOWNED`.
    /// Only written inside a critical section.
    owner: AtomicUsize,
}

/// A shared reference to a [`Task`].
///
/// The task (and any messages still in its mailbox) is freed when the last
/// `TaskRef` is dropped. A [`Dispatcher`] holds one `TaskRef` for every
/// registered task.
#[derive(Clone)]
pub struct TaskRef(Arc<Task>);

/// The task registry, and the polling entry point that drives it.
pub struct Dispatcher {
    id: usize,
    registry: Mutex<RefCell<List<Task>>>,
    running: AtomicBool,
}

const UNOWNED: usize = 0;
static NEXT_DISPATCHER_ID: AtomicUsize = AtomicUsize::new(UNOWNED + 1);

/// What happened during one [`Dispatcher::dispatch_once`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Number of tasks visited.
    pub tasks: usize,
    /// Number of messages consumed and freed.
    pub consumed: usize,
    /// Number of `Saved` verdicts. At most one per task.
    pub saved: usize,
}

/// Holds a flag for as long as it lives.
struct Claim<'a>(&'a AtomicBool);

// === impl Task ===

impl Task {
    /// Returns a new, unregistered task with an empty mailbox.
    pub fn new(name: &'static str, handler: impl Handler + 'static) -> TaskRef {
        TaskRef(Arc::new(Task {
            links: Links::new(),
            name,
            mailbox: Mutex::new(RefCell::new(List::new())),
            handler: UnsafeCell::new(Box::new(handler)),
            busy: AtomicBool::new(false),
            owner: AtomicUsize::new(UNOWNED),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of messages waiting in the mailbox.
    #[must_use]
    pub fn mailbox_len(&self) -> usize {
        critical_section::with(|cs| self.mailbox.borrow_ref(cs).len())
    }

    /// Returns `true` if the mailbox is empty.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        critical_section::with(|cs| self.mailbox.borrow_ref(cs).is_empty())
    }

    /// Returns `true` if the task is registered with a dispatcher.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        critical_section::with(|_| self.links.is_linked())
    }

    /// Offers the queued messages to the handler, in order.
    ///
    /// Each message's successor is looked up just before the message is
    /// handled. A message sent while the handler runs is offered in this pass
    /// unless the message being handled was the last one queued; then it
    /// waits for the next pass.
    fn run(&self, dispatch: &mut Dispatch) {
        let Some(_busy) = Claim::try_claim(&self.busy) else {
            panic!("handler of task {} is already running", self.name);
        };

        let mut curr = critical_section::with(|cs| self.mailbox.borrow_ref(cs).front_raw());

        // Only the dispatcher removes messages from a mailbox, so the
        // pointers we hold stay valid while the handler runs.
        while let Some(msg) = curr {
            let next = critical_section::with(|cs| unsafe {
                self.mailbox.borrow_ref(cs).peek_next_raw(msg)
            });

            // Safety: `busy` is held, so nothing else is calling the handler.
            let handler = unsafe { &mut *self.handler.get() };
            let verdict = handler.handle(unsafe { msg.as_ref() });
            tracing::trace!(
                task = self.name,
                id = unsafe { msg.as_ref() }.id(),
                ?verdict,
                "handled message"
            );

            match verdict {
                Verdict::Consumed => {
                    let freed = critical_section::with(|cs| unsafe {
                        self.mailbox.borrow_ref_mut(cs).remove(msg)
                    });
                    debug_assert!(freed.is_some(), "consumed message was not in the mailbox");
                    dispatch.consumed += 1;
                    drop(freed);
                }
                Verdict::Saved => {
                    dispatch.saved += 1;
                    break;
                }
            }

            curr = next;
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("mailbox_len", &self.mailbox_len())
            .field("registered", &self.is_registered())
            .finish()
    }
}

unsafe impl Linked<Links<Task>> for Task {
    type Handle = TaskRef;

    fn into_ptr(handle: TaskRef) -> NonNull<Task> {
        let ptr = Arc::into_raw(handle.0).cast_mut();
        // Safety: `Arc::into_raw` never returns null.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    unsafe fn from_ptr(ptr: NonNull<Task>) -> TaskRef {
        TaskRef(Arc::from_raw(ptr.as_ptr()))
    }

    unsafe fn links(ptr: NonNull<Task>) -> NonNull<Links<Task>> {
        let links = addr_of_mut!((*ptr.as_ptr()).links);
        NonNull::new_unchecked(links)
    }
}

// Safety: the handler is only ever accessed by whoever holds `busy`, and
// everything else is behind a critical section.
unsafe impl Sync for Task {}

// === impl TaskRef ===

impl TaskRef {
    /// Appends a message to the task's mailbox.
    ///
    /// May be called from interrupt context.
    pub fn send(&self, msg: MessageBox) {
        let id = msg.id();
        critical_section::with(|cs| self.mailbox.borrow_ref_mut(cs).push_back(msg));
        tracing::trace!(task = self.name, id, isr = isr::is_active(), "sent message");
    }

    /// Returns `true` if both refs point at the same task.
    #[must_use]
    pub fn ptr_eq(&self, other: &TaskRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// # Safety
    ///
    /// `ptr` must point to a task that is kept alive by some other `TaskRef`
    /// for the duration of this call.
    unsafe fn clone_from_ptr(ptr: NonNull<Task>) -> TaskRef {
        Arc::increment_strong_count(ptr.as_ptr());
        TaskRef(Arc::from_raw(ptr.as_ptr()))
    }

    fn as_ptr(&self) -> NonNull<Task> {
        NonNull::from(&*self.0)
    }
}

impl Deref for TaskRef {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.0
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

// === impl Dispatcher ===

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
            registry: Mutex::new(RefCell::new(List::new())),
            running: AtomicBool::new(false),
        }
    }

    /// Registers a task. It is visited after every task registered before it.
    ///
    /// Whatever is still in the task's mailbox stays there.
    ///
    /// # Panics
    ///
    /// If the task is already registered.
    pub fn create(&self, task: &TaskRef) {
        critical_section::with(|cs| {
            assert!(
                !task.links.is_linked(),
                "task {} is already registered",
                task.name
            );
            task.owner.store(self.id, Ordering::Relaxed);
            self.registry.borrow_ref_mut(cs).push_back(task.clone());
        });
        tracing::debug!(task = task.name, "registered task");
    }

    /// Unregisters a task, returning `false` if it wasn't registered here.
    ///
    /// Messages in the task's mailbox are left where they are. They are
    /// handled if the task is registered again, and freed when the last
    /// [`TaskRef`] to the task is dropped.
    pub fn delete(&self, task: &TaskRef) -> bool {
        let removed = critical_section::with(|cs| {
            if task.owner.load(Ordering::Relaxed) != self.id {
                return None;
            }
            task.owner.store(UNOWNED, Ordering::Relaxed);
            // Safety: the owner tag says the task is linked into this registry.
            unsafe { self.registry.borrow_ref_mut(cs).remove(task.as_ptr()) }
        });

        match removed {
            Some(_ours) => {
                tracing::debug!(
                    task = task.name,
                    queued = task.mailbox_len(),
                    "unregistered task"
                );
                true
            }
            None => false,
        }
    }

    /// Appends a message to a task's mailbox. See [`TaskRef::send`].
    pub fn send(&self, task: &TaskRef, msg: MessageBox) {
        task.send(msg)
    }

    /// Makes one pass over every registered task, in registration order,
    /// offering each one its queued messages.
    ///
    /// Tasks registered during the pass are visited if the pass hasn't gone
    /// past them yet. A task unregistered during the pass is not visited
    /// after it was unregistered.
    ///
    /// # Panics
    ///
    /// If called from a handler while a pass is already running.
    #[tracing::instrument(level = "trace", name = "Dispatcher::dispatch_once", skip(self))]
    pub fn dispatch_once(&self) -> Dispatch {
        let Some(_running) = Claim::try_claim(&self.running) else {
            panic!("dispatch_once called reentrantly");
        };

        let mut dispatch = Dispatch::default();
        let mut next = critical_section::with(|cs| {
            let registry = self.registry.borrow_ref(cs);
            // Safety: the registry holds a ref to each of its tasks.
            registry
                .front_raw()
                .map(|ptr| unsafe { TaskRef::clone_from_ptr(ptr) })
        });

        while let Some(task) = next {
            // The task may be unregistered by its own handler, which would
            // lose our place in the registry. Remember its current successor.
            let fallback = self.successor(&task);

            dispatch.tasks += 1;
            task.run(&mut dispatch);

            next = if self.owns(&task) {
                self.successor(&task)
            } else {
                fallback.filter(|t| self.owns(t))
            };
        }

        dispatch
    }

    /// Returns `true` if every registered task has an empty mailbox.
    #[must_use]
    pub fn all_mailboxes_empty(&self) -> bool {
        critical_section::with(|cs| {
            self.registry
                .borrow_ref(cs)
                .iter()
                .all(|task| task.mailbox.borrow_ref(cs).is_empty())
        })
    }

    /// Returns `true` if no task is registered.
    #[must_use]
    pub fn registry_empty(&self) -> bool {
        critical_section::with(|cs| self.registry.borrow_ref(cs).is_empty())
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn tasks(&self) -> usize {
        critical_section::with(|cs| self.registry.borrow_ref(cs).len())
    }

    fn owns(&self, task: &Task) -> bool {
        critical_section::with(|_| task.owner.load(Ordering::Relaxed) == self.id)
    }

    fn successor(&self, task: &TaskRef) -> Option<TaskRef> {
        critical_section::with(|cs| {
            if task.owner.load(Ordering::Relaxed) != self.id {
                return None;
            }
            let registry = self.registry.borrow_ref(cs);
            // Safety: the task is linked into this registry, which holds a
            // ref to each of its tasks.
            unsafe {
                registry
                    .peek_next_raw(task.as_ptr())
                    .map(|ptr| TaskRef::clone_from_ptr(ptr))
            }
        })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tasks", &self.tasks())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

// === impl Claim ===

impl<'a> Claim<'a> {
    fn try_claim(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
