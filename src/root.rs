//! Top-level reconciliation targets.

use crate::{
	element::Output,
	env::Env,
	error::Error,
	frame::FrameHandle,
	host::Host,
	hydrate::{Cursor, HydrationReport},
	mounted::{Mounted, Owner},
	reconcile::{diff, insert, Cx},
	scheduler::Scheduler,
	vnode::VNode,
};
use core::cell::Cell;
use std::rc::Rc;
use tracing::{debug, trace_span};

/// Owns everything rendered into one host container.
///
/// Render errors no boundary recovered from are reported to the error sink and leave the content in its last
/// successfully committed state. Only invariant violations are returned.
pub struct Root<H: Host> {
	env: Rc<Env<H>>,
	scheduler: Rc<Scheduler<H>>,
	container: H::Node,
	content: Option<Mounted<H>>,
}
impl<H: Host> Root<H> {
	#[must_use]
	pub fn new(env: &Rc<Env<H>>, container: H::Node) -> Self {
		Self {
			env: Rc::clone(env),
			scheduler: Scheduler::new(env),
			container,
			content: None,
		}
	}

	#[must_use]
	pub fn container(&self) -> &H::Node {
		&self.container
	}

	#[must_use]
	pub fn env(&self) -> &Rc<Env<H>> {
		&self.env
	}

	/// The scheduler of components rendered through this root.
	#[must_use]
	pub fn scheduler(&self) -> &Rc<Scheduler<H>> {
		&self.scheduler
	}

	/// Reconciles the container's content to `output`.
	///
	/// # Errors
	///
	/// [`Error::InvariantViolation`] if `output` is malformed or the committed tree is inconsistent.
	pub fn render(&mut self, output: impl Into<Output>) -> Result<(), Error> {
		let span = trace_span!("Rendering root");
		let _enter = span.enter();
		let next = VNode::normalize(output.into())?;
		let cx = Cx::new(&self.env, &self.scheduler);
		let result = match self.content.as_mut() {
			Some(content) => diff(cx, content, next, &self.container, None, &Owner::Root),
			None => insert(cx, next, &self.container, None, &Owner::Root, None).map(|content| self.content = Some(content)),
		};
		self.settle(result)
	}

	/// Takes over server-rendered content of the container, reusing its host nodes where they match `output`.
	///
	/// Mismatches are logged, repaired and counted.
	///
	/// # Errors
	///
	/// [`Error::InvariantViolation`] if `output` is malformed or this root already has content.
	pub fn hydrate(&mut self, output: impl Into<Output>) -> Result<HydrationReport, Error> {
		let span = trace_span!("Hydrating root");
		let _enter = span.enter();
		if self.content.is_some() {
			return Err(Error::invariant("can't hydrate a root that already has content"));
		}
		let next = VNode::normalize(output.into())?;
		let host = &self.env.host;
		let mismatches = Rc::new(Cell::new(0));
		let mut cursor = Cursor::new(self.container.clone(), host.first_child(&self.container), None, Rc::clone(&mismatches));
		let cx = Cx::new(&self.env, &self.scheduler);
		let result = insert(cx, next, &self.container, None, &Owner::Root, Some(&mut cursor)).map(|content| {
			cursor.finish(host);
			self.content = Some(content);
		});
		self.settle(result)?;
		debug!("Hydrated root with {} mismatch(es).", mismatches.get());
		Ok(HydrationReport {
			mismatches: mismatches.get(),
			..HydrationReport::default()
		})
	}

	/// Removes all content, running teardown tasks of all components.
	pub fn unmount(&mut self) {
		let span = trace_span!("Unmounting root");
		let _enter = span.enter();
		if let Some(content) = self.content.take() {
			content.detach(Cx::new(&self.env, &self.scheduler), Some(&self.container));
		}
	}

	#[must_use]
	pub fn frame(&self, id: &str) -> Option<FrameHandle<H>> {
		self.env.frame(id)
	}

	fn settle(&self, result: Result<(), Error>) -> Result<(), Error> {
		match result {
			Err(error) if !error.is_fatal() => {
				self.env.sink.report(&error);
				Ok(())
			}
			other => other,
		}
	}
}
impl<H: Host> Drop for Root<H> {
	fn drop(&mut self) {
		self.unmount();
	}
}
