//! The engine's side of the Event Bridge.
//!
//! Each host element with event descriptors owns one [`ListenerSet`]. Listeners are installed once per event name and
//! always dispatch to the handlers of the latest diff, so closures stay current without being re-attached.
//! A dispatch of an event that is already being handled on the same target is suppressed, not queued.

use crate::{
	element::EventDescriptor,
	host::{Dispatch, Host, ListenerCleanup},
};
use core::{any::Any, cell::RefCell};
use hashbrown::HashSet;
use std::{
	borrow::Cow,
	rc::{Rc, Weak},
};
use tracing::{trace, trace_span};

/// A dispatched event, as seen by handlers.
#[derive(Clone, Copy)]
pub struct Event<'a> {
	name: &'a str,
	raw: &'a dyn Any,
}
impl<'a> Event<'a> {
	#[must_use]
	pub fn new(name: &'a str, raw: &'a dyn Any) -> Self {
		Self { name, raw }
	}

	#[must_use]
	pub fn name(&self) -> &str {
		self.name
	}

	/// The platform event object, e.g. a [`web_sys::Event`].
	#[must_use]
	pub fn downcast_ref<T: 'static>(&self) -> Option<&'a T> {
		self.raw.downcast_ref()
	}
}
impl core::fmt::Debug for Event<'_> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Event").field("name", &self.name).finish_non_exhaustive()
	}
}

type Handlers = Rc<RefCell<Vec<EventDescriptor>>>;

pub(crate) struct ListenerSet {
	handlers: Handlers,
	names: Vec<Cow<'static, str>>,
	cleanup: ListenerCleanup,
}
impl ListenerSet {
	pub(crate) fn bind<H: Host>(host: &H, target: &H::Node, events: Vec<EventDescriptor>) -> Option<Self> {
		if events.is_empty() {
			return None;
		}
		let names = distinct_names(&events);
		let handlers = Rc::new(RefCell::new(events));
		let cleanup = host.bind_events(target, &names, dispatcher(Rc::downgrade(&handlers)));
		trace!("Bound {} event name(s).", names.len());
		Some(Self { handlers, names, cleanup })
	}

	/// Swaps in the latest handlers, re-binding only if the set of event names changed.
	pub(crate) fn update<H: Host>(this: &mut Option<Self>, host: &H, target: &H::Node, events: Vec<EventDescriptor>) {
		match this {
			Some(set) if set.names == distinct_names(&events) => {
				*set.handlers.borrow_mut() = events;
			}
			_ => {
				if let Some(previous) = this.take() {
					previous.release();
				}
				*this = Self::bind(host, target, events);
			}
		}
	}

	pub(crate) fn release(self) {
		let span = trace_span!("Releasing listeners", "names.len()" = self.names.len());
		let _enter = span.enter();
		self.cleanup.release();
	}
}

fn distinct_names(events: &[EventDescriptor]) -> Vec<Cow<'static, str>> {
	let mut names: Vec<Cow<'static, str>> = Vec::with_capacity(events.len());
	for event in events {
		if !names.contains(&event.name) {
			names.push(event.name.clone());
		}
	}
	names
}

fn dispatcher(handlers: Weak<RefCell<Vec<EventDescriptor>>>) -> Dispatch {
	let active = Rc::new(RefCell::new(HashSet::<String>::new()));
	Rc::new(move |name: &str, raw: &dyn Any| {
		let span = trace_span!("Dispatching event", name);
		let _enter = span.enter();

		let handlers = match handlers.upgrade() {
			Some(handlers) => handlers,
			None => return trace!("Listener outlived its element binding. Ignoring."),
		};

		if !active.borrow_mut().insert(name.to_owned()) {
			return trace!("Suppressed re-entrant dispatch.");
		}
		let _guard = Deactivate { active: &active, name };

		// Cloned out so that handlers may cause a re-render that replaces them.
		let matching: Vec<_> = handlers.borrow().iter().filter(|d| d.name == name).map(|d| Rc::clone(&d.handler)).collect();
		let event = Event::new(name, raw);
		for handler in matching {
			handler(&event);
		}
	})
}

struct Deactivate<'a> {
	active: &'a RefCell<HashSet<String>>,
	name: &'a str,
}
impl Drop for Deactivate<'_> {
	fn drop(&mut self) {
		self.active.borrow_mut().remove(self.name);
	}
}
