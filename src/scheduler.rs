//! Batches component re-renders and side-effect tasks into scheduling ticks.
//!
//! Any number of [`update`](`crate::component::Scope::update`) and task requests within one synchronous turn coalesce
//! into a single tick, requested from the platform through a [`TickQueue`]. A tick runs to completion: first all
//! pending re-renders, then all queued tasks in FIFO order.

use crate::{
	component::ComponentInstance,
	env::Env,
	error::Error,
	host::Host,
	mounted::{live_anchor, Placement},
	reconcile::Cx,
};
use core::cell::{Cell, RefCell};
use hashbrown::{HashMap, HashSet};
use std::{
	collections::VecDeque,
	rc::{Rc, Weak},
};
use tracing::{debug, debug_span, trace};

/// A side effect to run after the host tree reflects the render that queued it.
pub type Task = Box<dyn FnOnce() -> Result<(), Error>>;

/// One scheduling tick, to be run by the platform's cooperative task queue.
pub type Tick = Box<dyn FnOnce() -> Result<(), Error>>;

/// The platform's cooperative, single-threaded task queue.
pub trait TickQueue {
	/// Runs `tick` soon, but not synchronously within this call.
	fn request(&self, tick: Tick);
}

/// A [`TickQueue`] that only runs ticks when asked to, for headless hosts and tests.
#[derive(Default)]
pub struct ManualTicks {
	queue: RefCell<VecDeque<Tick>>,
}
impl ManualTicks {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn pending(&self) -> usize {
		self.queue.borrow().len()
	}

	/// Runs the oldest requested tick, if any.
	pub fn run_next(&self) -> Option<Result<(), Error>> {
		let tick = self.queue.borrow_mut().pop_front()?;
		Some(tick())
	}

	/// Runs ticks, including ones requested meanwhile, until none are left.
	///
	/// # Errors
	///
	/// The first error a tick returns. Later ticks stay queued.
	pub fn run_until_idle(&self) -> Result<usize, Error> {
		let mut count = 0;
		while let Some(result) = self.run_next() {
			result?;
			count += 1;
		}
		Ok(count)
	}
}
impl TickQueue for ManualTicks {
	fn request(&self, tick: Tick) {
		self.queue.borrow_mut().push_back(tick);
	}
}

struct PendingUpdate<H: Host> {
	instance: Weak<ComponentInstance<H>>,
	placement: Placement<H>,
}

struct PendingTable<H: Host> {
	order: Vec<u64>,
	entries: HashMap<u64, PendingUpdate<H>>,
}
impl<H: Host> Default for PendingTable<H> {
	fn default() -> Self {
		Self {
			order: Vec::new(),
			entries: HashMap::new(),
		}
	}
}

pub struct Scheduler<H: Host> {
	env: Rc<Env<H>>,
	this: Weak<Self>,
	pending: RefCell<PendingTable<H>>,
	tasks: RefCell<Vec<Task>>,
	tick_requested: Cell<bool>,
}
impl<H: Host> Scheduler<H> {
	#[must_use]
	pub fn new(env: &Rc<Env<H>>) -> Rc<Self> {
		Rc::new_cyclic(|this| Self {
			env: Rc::clone(env),
			this: this.clone(),
			pending: RefCell::default(),
			tasks: RefCell::default(),
			tick_requested: Cell::new(false),
		})
	}

	pub(crate) fn enqueue(&self, instance: Rc<ComponentInstance<H>>, placement: Placement<H>) {
		let id = instance.core.id;
		{
			let mut pending = self.pending.borrow_mut();
			let update = PendingUpdate {
				instance: Rc::downgrade(&instance),
				placement,
			};
			if pending.entries.insert(id, update).is_none() {
				pending.order.push(id);
			} else {
				trace!("Coalesced update of {}.", instance.core.name);
			}
		}
		self.request_tick();
	}

	pub(crate) fn push_task(&self, task: Task) {
		self.tasks.borrow_mut().push(task);
		self.request_tick();
	}

	fn request_tick(&self) {
		if self.tick_requested.replace(true) {
			return;
		}
		let this = self.this.clone();
		self.env.ticks.request(Box::new(move || match this.upgrade() {
			Some(scheduler) => scheduler.tick(),
			None => Ok(()),
		}));
	}

	/// Whether no re-render or task is waiting for a tick.
	#[must_use]
	pub fn is_idle(&self) -> bool {
		self.pending.borrow().order.is_empty() && self.tasks.borrow().is_empty()
	}

	/// Runs one scheduling tick.
	///
	/// Normally invoked through the [`TickQueue`], but may be called directly to flush synchronously.
	///
	/// # Errors
	///
	/// Fatal errors from re-rendering, and the first error returned by a queued task.
	/// In the latter case, the remaining tasks of this tick are dropped.
	pub fn tick(self: &Rc<Self>) -> Result<(), Error> {
		let span = debug_span!("Scheduler tick");
		let _enter = span.enter();
		self.tick_requested.set(false);

		let PendingTable { order, mut entries } = core::mem::take(&mut *self.pending.borrow_mut());
		let snapshot: HashSet<u64> = order.iter().copied().collect();
		let host = &self.env.host;
		let mut rendered = 0_usize;
		for id in order {
			let PendingUpdate { instance, placement } = match entries.remove(&id) {
				Some(update) => update,
				None => continue,
			};
			let instance = match instance.upgrade() {
				Some(instance) if !instance.core.is_removed() => instance,
				_ => {
					trace!("Skipping removed component.");
					continue;
				}
			};
			if instance.core.ancestors().any(|ancestor| snapshot.contains(&ancestor.id)) {
				trace!("Skipping {}, an ancestor re-renders in this tick.", instance.core.name);
				continue;
			}

			let cx = Cx::new(&self.env, self);
			// Siblings may have replaced their host nodes since the anchor was recorded.
			let anchor = match instance.following_node(host) {
				Some(following) => following,
				None => live_anchor(host, &placement.parent, placement.anchor),
			};
			if let Err(error) = instance.rerender(cx, &placement.parent, anchor.as_ref()) {
				instance.owner.recover(cx, error)?;
			}
			rendered += 1;
		}

		let tasks = core::mem::take(&mut *self.tasks.borrow_mut());
		debug!("Re-rendered {} component(s), running {} task(s).", rendered, tasks.len());
		for task in tasks {
			task()?;
		}
		Ok(())
	}
}
