//! Component instances and the [`Scope`] their render functions run against.
//!
//! An instance is created once per component position and reused across re-renders. It owns hook slots, provided
//! context values, a cancellation generation that advances with every render attempt, and a permanent removed flag.

use crate::{
	element::{Key, Output},
	error::Error,
	host::Host,
	hydrate::Cursor,
	mounted::{Mounted, Owner, Placement},
	reconcile::{diff, insert, Cx},
	scheduler::{Scheduler, Task},
	vnode::{ComponentNode, VNode},
};
use core::{
	any::{Any, TypeId},
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	future::Future,
	sync::atomic::{AtomicU64, Ordering},
};
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use std::{
	borrow::Cow,
	rc::{Rc, Weak},
};
use tracing::{trace, trace_span};

pub type RenderFn = dyn Fn(&Scope<'_>) -> Result<Output, Error>;

/// A named render function. Two component types are the same iff their names are equal.
#[derive(Clone)]
pub struct ComponentType {
	name: Cow<'static, str>,
	render: Rc<RenderFn>,
}
impl ComponentType {
	pub fn new(name: impl Into<Cow<'static, str>>, render: impl Fn(&Scope<'_>) -> Result<Output, Error> + 'static) -> Self {
		Self {
			name: name.into(),
			render: Rc::new(render),
		}
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}
}
impl PartialEq for ComponentType {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
	}
}
impl Eq for ComponentType {}
impl Debug for ComponentType {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ComponentType").field(&self.name).finish()
	}
}

/// Tells whether the render attempt it was issued for is still current.
///
/// Starting a new render of the same component invalidates all earlier tokens, as does removing it.
#[derive(Debug, Clone)]
pub struct CancelToken {
	generation: Rc<Cell<u64>>,
	issued: u64,
	removed: Rc<Cell<bool>>,
}
impl CancelToken {
	/// Issues a new token, superseding every earlier one sharing `generation`.
	pub(crate) fn issue(generation: &Rc<Cell<u64>>, removed: &Rc<Cell<bool>>) -> Self {
		let issued = generation.get().wrapping_add(1);
		generation.set(issued);
		Self {
			generation: Rc::clone(generation),
			issued,
			removed: Rc::clone(removed),
		}
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.removed.get() || self.generation.get() != self.issued
	}

	/// Awaits `future`, then discards its output if this token was cancelled meanwhile.
	pub async fn guard<F: Future>(self, future: F) -> Option<F::Output> {
		let output = future.await;
		if self.is_cancelled() {
			trace!("Discarding output of superseded work.");
			None
		} else {
			Some(output)
		}
	}
}

pub(crate) trait Updatable {
	fn request_update(&self);
	fn push_task(&self, task: Task);
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// The host-agnostic part of a component instance.
pub(crate) struct InstanceCore {
	pub(crate) id: u64,
	pub(crate) name: Cow<'static, str>,
	parent: Option<Weak<InstanceCore>>,
	instance: Weak<dyn Updatable>,
	generation: Rc<Cell<u64>>,
	removed: Rc<Cell<bool>>,
	hooks: RefCell<Vec<Rc<dyn Any>>>,
	hook_cursor: Cell<usize>,
	contexts: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
	teardown: RefCell<Vec<Box<dyn FnOnce()>>>,
}
impl InstanceCore {
	fn new(name: Cow<'static, str>, parent: Option<Rc<InstanceCore>>, instance: Weak<dyn Updatable>) -> Self {
		Self {
			id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
			name,
			parent: parent.as_ref().map(Rc::downgrade),
			instance,
			generation: Rc::default(),
			removed: Rc::default(),
			hooks: RefCell::default(),
			hook_cursor: Cell::new(0),
			contexts: RefCell::default(),
			teardown: RefCell::default(),
		}
	}

	pub(crate) fn is_removed(&self) -> bool {
		self.removed.get()
	}

	/// Enclosing component instances, nearest first.
	pub(crate) fn ancestors(&self) -> impl Iterator<Item = Rc<InstanceCore>> {
		core::iter::successors(self.parent.as_ref().and_then(Weak::upgrade), |core| {
			core.parent.as_ref().and_then(Weak::upgrade)
		})
	}

	fn current_token(&self) -> CancelToken {
		CancelToken {
			generation: Rc::clone(&self.generation),
			issued: self.generation.get(),
			removed: Rc::clone(&self.removed),
		}
	}

	/// Marks the instance removed, cancels its current render and flushes its teardown tasks.
	fn invalidate(&self) {
		if self.removed.replace(true) {
			return;
		}
		self.generation.set(self.generation.get().wrapping_add(1));
		let teardown = core::mem::take(&mut *self.teardown.borrow_mut());
		trace!("Running {} teardown task(s).", teardown.len());
		for task in teardown {
			task();
		}
	}
}

/// What a render function can see of and do with its component instance.
pub struct Scope<'a> {
	core: &'a Rc<InstanceCore>,
	props: &'a serde_json::Value,
	children: &'a [VNode],
	token: CancelToken,
}
impl Scope<'_> {
	#[must_use]
	pub fn props(&self) -> &serde_json::Value {
		self.props
	}

	/// # Errors
	///
	/// [`Error::Render`] if the props don't deserialize into `T`.
	pub fn props_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
		T::deserialize(self.props).map_err(|error| Error::render(format!("invalid props for {}: {}", self.core.name, error)))
	}

	/// The children passed to this component, for embedding into its output.
	#[must_use]
	pub fn children(&self) -> Output {
		Output::List(self.children.iter().cloned().map(Output::from).collect())
	}

	/// Returns this render's slot in call order, initializing it on first render.
	///
	/// # Errors
	///
	/// [`Error::InvariantViolation`] if the slot was initialized with a different type.
	pub fn hook<T: 'static>(&self, init: impl FnOnce() -> T) -> Result<Rc<T>, Error> {
		let index = self.core.hook_cursor.get();
		self.core.hook_cursor.set(index + 1);
		if index == self.core.hooks.borrow().len() {
			let value: Rc<dyn Any> = Rc::new(init());
			self.core.hooks.borrow_mut().push(value);
		}
		let slot = Rc::clone(&self.core.hooks.borrow()[index]);
		slot.downcast()
			.map_err(|_| Error::invariant(format!("hook {} of {} changed its type between renders", index, self.core.name)))
	}

	/// Makes `value` visible to all descendant components through [`Scope::context`].
	pub fn provide_context<T: 'static>(&self, value: T) {
		self.core.contexts.borrow_mut().insert(TypeId::of::<T>(), Rc::new(value));
	}

	/// The value of type `T` provided by the nearest enclosing component.
	#[must_use]
	pub fn context<T: 'static>(&self) -> Option<Rc<T>> {
		self.core.ancestors().find_map(|ancestor| {
			let value = ancestor.contexts.borrow().get(&TypeId::of::<T>()).cloned()?;
			value.downcast().ok()
		})
	}

	/// Requests a re-render in the next scheduling tick.
	pub fn update(&self) {
		self.handle().update();
	}

	/// Runs `task` once the host tree reflects the current render.
	pub fn queue_task(&self, task: impl FnOnce() -> Result<(), Error> + 'static) {
		self.handle().queue_task(task);
	}

	pub fn on_teardown(&self, task: impl FnOnce() + 'static) {
		self.core.teardown.borrow_mut().push(Box::new(task));
	}

	/// The cancellation token of this render attempt.
	#[must_use]
	pub fn token(&self) -> CancelToken {
		self.token.clone()
	}

	#[must_use]
	pub fn handle(&self) -> ComponentHandle {
		ComponentHandle {
			core: Rc::downgrade(self.core),
		}
	}
}

/// A `'static` handle to a component instance, for use from event handlers and asynchronous work.
#[derive(Clone)]
pub struct ComponentHandle {
	core: Weak<InstanceCore>,
}
impl ComponentHandle {
	pub fn update(&self) {
		if let Some(instance) = self.core.upgrade().and_then(|core| core.instance.upgrade()) {
			instance.request_update();
		}
	}

	pub fn queue_task(&self, task: impl FnOnce() -> Result<(), Error> + 'static) {
		if let Some(instance) = self.core.upgrade().and_then(|core| core.instance.upgrade()) {
			instance.push_task(Box::new(task));
		}
	}

	/// The token of the instance's latest render attempt, or [`None`] once it's gone.
	#[must_use]
	pub fn token(&self) -> Option<CancelToken> {
		self.core.upgrade().map(|core| core.current_token())
	}

	#[must_use]
	pub fn is_removed(&self) -> bool {
		self.core.upgrade().map_or(true, |core| core.is_removed())
	}
}
impl Debug for ComponentHandle {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComponentHandle").field("removed", &self.is_removed()).finish()
	}
}

struct Input {
	props: serde_json::Value,
	children: Vec<VNode>,
}

pub(crate) struct ComponentInstance<H: Host> {
	pub(crate) core: Rc<InstanceCore>,
	pub(crate) key: Option<Key>,
	pub(crate) owner: Owner<H>,
	/// Replaced on every update, since equally named types may carry different render closures.
	ty: RefCell<ComponentType>,
	this: Weak<Self>,
	scheduler: Weak<Scheduler<H>>,
	input: RefCell<Input>,
	placement: RefCell<Placement<H>>,
	pub(crate) child: RefCell<Option<Mounted<H>>>,
}
impl<H: Host> ComponentInstance<H> {
	pub(crate) fn mount(
		cx: Cx<'_, H>,
		node: ComponentNode,
		parent: &H::Node,
		anchor: Option<&H::Node>,
		owner: &Owner<H>,
		cursor: Option<&mut Cursor<H>>,
	) -> Result<Rc<Self>, Error> {
		let ComponentNode { ty, key, props, children } = node;
		let span = trace_span!("Mounting component", name = ty.name());
		let _enter = span.enter();

		let instance = Rc::new_cyclic(|this: &Weak<Self>| {
			let updatable: Weak<dyn Updatable> = this.clone();
			Self {
				core: Rc::new(InstanceCore::new(ty.name.clone(), owner.component_core(), updatable)),
				key,
				owner: owner.clone(),
				ty: RefCell::new(ty),
				this: this.clone(),
				scheduler: Rc::downgrade(cx.scheduler),
				input: RefCell::new(Input { props, children }),
				placement: RefCell::new(Placement {
					parent: parent.clone(),
					anchor: anchor.cloned(),
				}),
				child: RefCell::new(None),
			}
		});

		let rendered = instance.render().and_then(|vnode| insert(cx, vnode, parent, anchor, &instance.as_owner(), cursor));
		match rendered {
			Ok(child) => {
				*instance.child.borrow_mut() = Some(child);
				Ok(instance)
			}
			Err(error) => {
				instance.core.invalidate();
				Err(error)
			}
		}
	}

	pub(crate) fn is_of_type(&self, ty: &ComponentType) -> bool {
		*self.ty.borrow() == *ty
	}

	fn name(&self) -> &str {
		&self.core.name
	}

	/// The host node following this component's output, or [`None`] if it has no host nodes.
	pub(crate) fn following_node(&self, host: &H) -> Option<Option<H::Node>> {
		let mut nodes = Vec::new();
		if let Some(child) = &*self.child.borrow() {
			child.host_nodes(&mut nodes);
		}
		nodes.last().map(|last| host.next_sibling(last))
	}

	fn as_owner(&self) -> Owner<H> {
		Owner::Component(self.this.clone())
	}

	fn render(&self) -> Result<VNode, Error> {
		let token = CancelToken::issue(&self.core.generation, &self.core.removed);
		self.core.hook_cursor.set(0);
		let input = self.input.borrow();
		let scope = Scope {
			core: &self.core,
			props: &input.props,
			children: &input.children,
			token,
		};
		let render_fn = Rc::clone(&self.ty.borrow().render);
		let output = render_fn(&scope)?;
		VNode::normalize(output)
	}

	/// Re-renders with new props and children from the parent's pass.
	pub(crate) fn update(&self, cx: Cx<'_, H>, node: ComponentNode, parent: &H::Node, anchor: Option<&H::Node>) -> Result<(), Error> {
		let span = trace_span!("Updating component", name = self.name());
		let _enter = span.enter();
		*self.ty.borrow_mut() = node.ty;
		*self.input.borrow_mut() = Input {
			props: node.props,
			children: node.children,
		};
		self.rerender(cx, parent, anchor)
	}

	pub(crate) fn rerender(&self, cx: Cx<'_, H>, parent: &H::Node, anchor: Option<&H::Node>) -> Result<(), Error> {
		*self.placement.borrow_mut() = Placement {
			parent: parent.clone(),
			anchor: anchor.cloned(),
		};
		let vnode = self.render()?;
		let owner = self.as_owner();
		let mut child = self.child.borrow_mut();
		match child.as_mut() {
			Some(mounted) => diff(cx, mounted, vnode, parent, anchor, &owner),
			None => {
				*child = Some(insert(cx, vnode, parent, anchor, &owner, None)?);
				Ok(())
			}
		}
	}

	pub(crate) fn teardown(&self, cx: Cx<'_, H>, parent: Option<&H::Node>) {
		let span = trace_span!("Removing component", name = self.name());
		let _enter = span.enter();
		self.core.invalidate();
		let child = self.child.borrow_mut().take();
		if let Some(child) = child {
			child.detach(cx, parent);
		}
	}
}
impl<H: Host> Updatable for ComponentInstance<H> {
	fn request_update(&self) {
		if self.core.is_removed() {
			return trace!("Ignoring update request of removed component {}.", self.name());
		}
		if let (Some(this), Some(scheduler)) = (self.this.upgrade(), self.scheduler.upgrade()) {
			let placement = self.placement.borrow().clone();
			scheduler.enqueue(this, placement);
		}
	}

	fn push_task(&self, task: Task) {
		match self.scheduler.upgrade() {
			Some(scheduler) => scheduler.push_task(task),
			None => trace!("Dropping task queued after its scheduler went away."),
		}
	}
}
