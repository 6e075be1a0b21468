//! Frames: islands of content between a pair of comment markers that update independently of their surroundings.
//!
//! Each frame has its own [`Scheduler`]. Errors raised within a frame are reported to the error sink and never reach
//! an enclosing [`catch`](`crate::element::catch`) boundary. Once a frame's content was set through its
//! [`FrameHandle`] or arrived late during hydration, diffs of the enclosing tree leave that content alone.

use crate::{
	children,
	component::CancelToken,
	element::{FrameProps, FrameStatus, Key, Output},
	env::Env,
	error::Error,
	host::Host,
	hydrate::{Cursor, FRAME_END, FRAME_START},
	load::{load_modules, load_region, module_specs_between},
	mounted::{Mounted, Owner},
	reconcile::{insert_all, Cx},
	scheduler::Scheduler,
	vnode::{FrameNode, VNode},
};
use core::cell::{Cell, RefCell};
use futures::future::LocalBoxFuture;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, trace_span, warn, Instrument};

/// Fetches the markup of a frame from its `src`.
pub trait Fetcher {
	fn fetch(&self, src: &str) -> LocalBoxFuture<'static, Result<String, Error>>;
}

pub(crate) struct FrameContext<H: Host> {
	pub(crate) key: Option<Key>,
	pub(crate) start: H::Node,
	end: H::Node,
	pub(crate) owner: Owner<H>,
	this: Weak<Self>,
	props: RefCell<FrameProps>,
	env: Rc<Env<H>>,
	scheduler: Rc<Scheduler<H>>,
	children: RefCell<Vec<Mounted<H>>>,
	/// Advanced by every content load, so only the latest one commits.
	reloads: Rc<Cell<u64>>,
	removed: Rc<Cell<bool>>,
	independent: Cell<bool>,
}

impl<H: Host> FrameContext<H> {
	pub(crate) fn mount(
		cx: Cx<'_, H>,
		node: FrameNode,
		parent: &H::Node,
		anchor: Option<&H::Node>,
		owner: &Owner<H>,
		mut cursor: Option<&mut Cursor<H>>,
	) -> Result<Rc<Self>, Error> {
		let FrameNode { key, props, children } = node;
		let span = trace_span!("Mounting frame", id = %props.id);
		let _enter = span.enter();
		let host = cx.host();

		let claimed = match cursor.as_deref_mut() {
			Some(cursor) => cursor.claim_frame(host, &props.id),
			None => None,
		};
		let hydrating = claimed.is_some();
		let (start, end) = match claimed {
			Some(markers) => markers,
			None => {
				let anchor = match cursor.as_deref() {
					Some(cursor) => cursor.anchor(),
					None => anchor.cloned(),
				};
				let start = host.create_comment(FRAME_START);
				let end = host.create_comment(FRAME_END);
				host.insert_before(parent, &start, anchor.as_ref());
				host.insert_before(parent, &end, anchor.as_ref());
				(start, end)
			}
		};

		// Server content of a pending frame stays in place until its real content arrives.
		let awaiting = hydrating && props.status == FrameStatus::Pending;
		let frame = Rc::new_cyclic(|this| Self {
			key,
			start,
			end,
			owner: owner.clone(),
			this: this.clone(),
			props: RefCell::new(props),
			env: Rc::clone(cx.env),
			scheduler: Scheduler::new(cx.env),
			children: RefCell::new(Vec::with_capacity(children.len())),
			reloads: Rc::default(),
			removed: Rc::default(),
			independent: Cell::new(awaiting),
		});
		frame.register();
		if awaiting {
			trace!("Frame is pending. Keeping its server content.");
			return Ok(frame);
		}

		let result = {
			let mut mounted = frame.children.borrow_mut();
			let inner_cx = cx.with_scheduler(&frame.scheduler);
			let owner = frame.as_owner();
			match cursor.as_deref() {
				Some(outer) if hydrating => {
					let mut inner = Cursor::new(parent.clone(), host.next_sibling(&frame.start), Some(frame.end.clone()), outer.mismatches());
					let result = insert_all(inner_cx, children, &mut mounted, parent, Some(&frame.end), &owner, Some(&mut inner));
					inner.finish(host);
					result
				}
				_ => insert_all(inner_cx, children, &mut mounted, parent, Some(&frame.end), &owner, None),
			}
		};
		match result {
			Err(error) if error.is_fatal() => {
				frame.teardown(cx, Some(parent));
				Err(error)
			}
			result => {
				frame.isolate(result)?;
				Ok(frame)
			}
		}
	}

	fn as_owner(&self) -> Owner<H> {
		Owner::Frame(self.this.clone())
	}

	pub(crate) fn id(&self) -> String {
		self.props.borrow().id.clone()
	}

	pub(crate) fn status(&self) -> FrameStatus {
		self.props.borrow().status
	}

	fn register(&self) {
		let id = self.id();
		let previous = self.env.frames.borrow_mut().insert(id.clone(), self.this.clone());
		if previous.and_then(|previous| previous.upgrade()).is_some() {
			warn!("Frame {:?} is mounted more than once. Only the latest one can be looked up.", id);
		}
	}

	fn unregister(&self) {
		let id = self.id();
		let mut frames = self.env.frames.borrow_mut();
		if frames.get(&id).map_or(false, |frame| frame.ptr_eq(&self.this)) {
			frames.remove(&id);
		}
	}

	/// Reports recoverable errors instead of letting them leave the frame.
	fn isolate(&self, result: Result<(), Error>) -> Result<(), Error> {
		match result {
			Err(error) if !error.is_fatal() => {
				warn!("Render error in frame {:?}.", self.id());
				self.env.sink.report(&error);
				Ok(())
			}
			other => other,
		}
	}

	/// All host nodes from the start marker through the end marker, including unmanaged ones in between.
	pub(crate) fn host_nodes(&self, out: &mut Vec<H::Node>) {
		let host = &self.env.host;
		let mut next = Some(self.start.clone());
		while let Some(node) = next {
			next = if node == self.end { None } else { host.next_sibling(&node) };
			out.push(node);
		}
	}

	pub(crate) fn diff(&self, cx: Cx<'_, H>, next: FrameNode, parent: &H::Node) -> Result<(), Error> {
		let FrameNode { props, children, .. } = next;
		let span = trace_span!("Diffing frame", id = %props.id);
		let _enter = span.enter();
		{
			let mut current = self.props.borrow_mut();
			current.src = props.src;
			if !self.independent.get() {
				current.status = props.status;
			}
		}
		if self.independent.get() {
			trace!("Frame content is managed independently. Skipping its children.");
			return Ok(());
		}
		let result = self.commit(cx, children, parent);
		self.isolate(result)
	}

	fn commit(&self, cx: Cx<'_, H>, next: Vec<VNode>, parent: &H::Node) -> Result<(), Error> {
		let mut mounted = self
			.children
			.try_borrow_mut()
			.map_err(|_| Error::invariant(format!("frame {:?} was updated while it was being reconciled", self.id())))?;
		children::reconcile(cx.with_scheduler(&self.scheduler), &mut mounted, next, parent, Some(&self.end), &self.as_owner())
	}

	/// Diffs independently set content into this frame.
	fn set_children(&self, next: Vec<VNode>) -> Result<(), Error> {
		if self.removed.get() {
			warn!("Ignoring new content for removed frame {:?}.", self.id());
			return Ok(());
		}
		let parent = self
			.env
			.host
			.parent(&self.start)
			.ok_or_else(|| Error::invariant(format!("frame {:?} is not attached", self.id())))?;
		self.independent.set(true);
		self.props.borrow_mut().status = FrameStatus::Ready;
		self.commit(Cx::new(&self.env, &self.scheduler), next, &parent)
	}

	/// Takes the children of `container` as this frame's content, hydrating them in place of what the frame showed.
	pub(crate) async fn fill(&self, container: H::Node) -> Result<(), Error> {
		let span = trace_span!("Filling frame", id = %self.id());
		self.fill_inner(container).instrument(span).await
	}

	async fn fill_inner(&self, container: H::Node) -> Result<(), Error> {
		let host = &self.env.host;
		let token = CancelToken::issue(&self.reloads, &self.removed);
		let specs = module_specs_between(host, host.first_child(&container), None)?;
		let modules = load_modules(self.env.loader.clone(), specs).await?;
		if token.is_cancelled() {
			debug!("Discarding superseded content.");
			return Ok(());
		}
		let next = load_region(host, host.first_child(&container), None, &modules)?;
		let parent = host
			.parent(&self.start)
			.ok_or_else(|| Error::invariant(format!("frame {:?} is not attached", self.id())))?;
		let cx = Cx::new(&self.env, &self.scheduler);

		let mut mounted = self
			.children
			.try_borrow_mut()
			.map_err(|_| Error::invariant(format!("frame {:?} was filled while it was being reconciled", self.id())))?;
		for previous in mounted.drain(..) {
			previous.detach(cx, Some(&parent));
		}
		self.clear_between_markers(&parent);
		while let Some(node) = host.first_child(&container) {
			host.insert_before(&parent, &node, Some(&self.end));
		}
		if let Some(holder) = host.parent(&container) {
			host.remove_child(&holder, &container);
		}

		self.independent.set(true);
		self.props.borrow_mut().status = FrameStatus::Ready;
		let mut cursor = Cursor::new(parent.clone(), host.next_sibling(&self.start), Some(self.end.clone()), Rc::default());
		let result = insert_all(cx, next, &mut mounted, &parent, Some(&self.end), &self.as_owner(), Some(&mut cursor));
		cursor.finish(host);
		drop(mounted);
		self.isolate(result)
	}

	/// Removes unmanaged host nodes between the markers, like server placeholders and payloads.
	fn clear_between_markers(&self, parent: &H::Node) {
		let host = &self.env.host;
		while let Some(node) = host.next_sibling(&self.start).filter(|node| *node != self.end) {
			host.remove_child(parent, &node);
		}
	}

	pub(crate) fn teardown(&self, cx: Cx<'_, H>, parent: Option<&H::Node>) {
		let span = trace_span!("Removing frame", id = %self.id());
		let _enter = span.enter();
		self.removed.set(true);
		self.unregister();
		let children = core::mem::take(&mut *self.children.borrow_mut());
		for child in children {
			child.detach(cx.with_scheduler(&self.scheduler), parent);
		}
		if let Some(parent) = parent {
			self.clear_between_markers(parent);
			let host = cx.host();
			host.remove_child(parent, &self.start);
			host.remove_child(parent, &self.end);
		}
	}
}

/// Controls a live frame from outside of any reconciliation pass.
pub struct FrameHandle<H: Host>(Rc<FrameContext<H>>);
impl<H: Host> Clone for FrameHandle<H> {
	fn clone(&self) -> Self {
		Self(Rc::clone(&self.0))
	}
}
impl<H: Host> FrameHandle<H> {
	pub(crate) fn new(frame: Rc<FrameContext<H>>) -> Self {
		Self(frame)
	}

	#[must_use]
	pub fn id(&self) -> String {
		self.0.id()
	}

	#[must_use]
	pub fn status(&self) -> FrameStatus {
		self.0.status()
	}

	#[must_use]
	pub fn src(&self) -> Option<String> {
		self.0.props.borrow().src.clone()
	}

	/// The scheduler of components within this frame.
	#[must_use]
	pub fn scheduler(&self) -> &Rc<Scheduler<H>> {
		&self.0.scheduler
	}

	#[must_use]
	pub fn is_removed(&self) -> bool {
		self.0.removed.get()
	}

	/// Diffs `output` into the frame, superseding any content load in flight.
	///
	/// # Errors
	///
	/// Any error of the reconciliation pass. The frame keeps what was committed up to that point.
	pub fn replace(&self, output: impl Into<Output>) -> Result<(), Error> {
		let span = trace_span!("Replacing frame content", id = %self.0.id());
		let _enter = span.enter();
		CancelToken::issue(&self.0.reloads, &self.0.removed);
		self.0.set_children(into_children(VNode::normalize(output.into())?))
	}

	/// Parses `markup` and diffs it into the frame, loading the modules of virtual roots within it first.
	///
	/// Returns `false` if a later content load superseded this one while modules were loading.
	///
	/// # Errors
	///
	/// [`Error::Host`] if the host can't parse `markup`, module load failures, and reconciliation errors.
	pub async fn replace_markup(&self, markup: &str) -> Result<bool, Error> {
		let span = trace_span!("Replacing frame markup", id = %self.0.id());
		let token = CancelToken::issue(&self.0.reloads, &self.0.removed);
		self.load_markup(markup, token).instrument(span).await
	}

	/// Fetches the frame's markup from its `src` again and diffs it in.
	///
	/// Returns `false` if a later content load superseded this one, or the frame was removed meanwhile.
	///
	/// # Errors
	///
	/// [`Error::InvariantViolation`] if the frame has no `src`, [`Error::Fetch`] if there is no [`Fetcher`] or it
	/// fails, and everything [`FrameHandle::replace_markup`] can fail with.
	pub async fn reload(&self) -> Result<bool, Error> {
		let id = self.0.id();
		let span = trace_span!("Reloading frame", id = %id);
		async move {
			let src = self
				.src()
				.ok_or_else(|| Error::invariant(format!("frame {:?} has no src to reload from", id)))?;
			let fetcher = self.0.env.fetcher.clone().ok_or_else(|| Error::Fetch {
				src: src.clone(),
				message: "no fetcher configured".to_owned(),
			})?;
			let token = CancelToken::issue(&self.0.reloads, &self.0.removed);
			let markup = fetcher.fetch(&src).await?;
			if token.is_cancelled() {
				debug!("Discarding superseded reload.");
				return Ok(false);
			}
			self.load_markup(&markup, token).await
		}
		.instrument(span)
		.await
	}

	async fn load_markup(&self, markup: &str, token: CancelToken) -> Result<bool, Error> {
		let frame = &self.0;
		let host = &frame.env.host;
		let container = host.parse_markup(markup)?;
		let specs = module_specs_between(host, host.first_child(&container), None)?;
		let modules = load_modules(frame.env.loader.clone(), specs).await?;
		if token.is_cancelled() {
			debug!("Discarding superseded markup.");
			return Ok(false);
		}
		let next = load_region(host, host.first_child(&container), None, &modules)?;
		frame.set_children(next)?;
		Ok(true)
	}
}

/// A frame's content as a child list, so that a top-level fragment doesn't hide its children from matching.
fn into_children(vnode: VNode) -> Vec<VNode> {
	match vnode {
		VNode::Fragment(fragment) if fragment.key.is_none() => fragment.children,
		other => vec![other],
	}
}
