//! Committed [`catch`](`crate::element::catch`) boundaries.
//!
//! A boundary shields its children: a recoverable error raised while inserting or diffing them removes all of them
//! and shows the fallback instead. Once tripped, the boundary keeps its fallback until its children change, at which
//! point the whole boundary is rebuilt.

use crate::{
	children,
	element::{Fallback, Key},
	error::Error,
	host::Host,
	hydrate::Cursor,
	mounted::{first_of, live_anchor, Mounted, Owner, Placement},
	reconcile::{insert, insert_all, Cx},
	vnode::{same_children, CatchNode, VNode},
};
use core::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{trace, trace_span};

pub(crate) struct CatchBoundary<H: Host> {
	pub(crate) key: Option<Key>,
	pub(crate) owner: Owner<H>,
	this: Weak<Self>,
	state: RefCell<CatchState<H>>,
}

struct CatchState<H: Host> {
	tripped: bool,
	/// The children of the latest pass, whether they're shown or not.
	shielded: Vec<VNode>,
	fallback: Fallback,
	/// What is mounted: either the shielded children or the fallback.
	added: Vec<Mounted<H>>,
	placement: Placement<H>,
}

impl<H: Host> CatchBoundary<H> {
	pub(crate) fn mount(
		cx: Cx<'_, H>,
		node: CatchNode,
		parent: &H::Node,
		anchor: Option<&H::Node>,
		owner: &Owner<H>,
		mut cursor: Option<&mut Cursor<H>>,
	) -> Result<Rc<Self>, Error> {
		let CatchNode { key, children, fallback } = node;
		let span = trace_span!("Mounting boundary", "children.len()" = children.len());
		let _enter = span.enter();

		let boundary = Rc::new_cyclic(|this| Self {
			key,
			owner: owner.clone(),
			this: this.clone(),
			state: RefCell::new(CatchState {
				tripped: false,
				shielded: children.clone(),
				fallback,
				added: Vec::with_capacity(children.len()),
				placement: Placement {
					parent: parent.clone(),
					anchor: anchor.cloned(),
				},
			}),
		});

		let result = {
			let mut state = boundary.state.borrow_mut();
			insert_all(cx, children, &mut state.added, parent, anchor, &boundary.as_owner(), cursor.as_deref_mut())
		};
		match result {
			Ok(()) => Ok(boundary),
			Err(error) if error.is_fatal() => Err(error),
			Err(error) => {
				boundary.fall_back(cx, error, cursor)?;
				Ok(boundary)
			}
		}
	}

	fn as_owner(&self) -> Owner<H> {
		Owner::Catch(self.this.clone())
	}

	/// Whether diffing `children` into this boundary requires rebuilding it from scratch.
	pub(crate) fn must_rebuild(&self, children: &[VNode]) -> bool {
		let state = self.state.borrow();
		state.tripped && !same_children(&state.shielded, children)
	}

	pub(crate) fn diff(&self, cx: Cx<'_, H>, next: CatchNode, parent: &H::Node, anchor: Option<&H::Node>) -> Result<(), Error> {
		let span = trace_span!("Diffing boundary");
		let _enter = span.enter();
		let CatchNode { children, fallback, .. } = next;

		let result = {
			let mut state = self.state.borrow_mut();
			state.placement = Placement {
				parent: parent.clone(),
				anchor: anchor.cloned(),
			};
			state.fallback = fallback;
			if state.tripped {
				trace!("Children unchanged, keeping the fallback.");
				return Ok(());
			}
			state.shielded = children.clone();
			children::reconcile(cx, &mut state.added, children, parent, anchor, &self.as_owner())
		};
		match result {
			Err(error) if !error.is_fatal() => self.fall_back(cx, error, None),
			other => other,
		}
	}

	/// Substitutes the fallback for an error raised by a scheduled re-render below this boundary.
	pub(crate) fn trip(&self, cx: Cx<'_, H>, error: Error) -> Result<(), Error> {
		match self.fall_back(cx, error, None) {
			Err(error) => self.owner.recover(cx, error),
			ok => ok,
		}
	}

	/// Inserts the fallback where the children were, then removes the children.
	fn fall_back(&self, cx: Cx<'_, H>, error: Error, cursor: Option<&mut Cursor<H>>) -> Result<(), Error> {
		let span = trace_span!("Showing fallback");
		let _enter = span.enter();
		let host = cx.host();

		let mut state = self.state.borrow_mut();
		let parent = state.placement.parent.clone();
		let position = first_of(&state.added).or_else(|| live_anchor(host, &parent, state.placement.anchor.clone()));
		let fallback = VNode::normalize(state.fallback.produce(&error))?;
		let mounted = insert(cx, fallback, &parent, position.as_ref(), &self.owner, cursor)?;
		for abandoned in core::mem::replace(&mut state.added, vec![mounted]) {
			abandoned.detach(cx, Some(&parent));
		}
		state.tripped = true;
		drop(state);

		cx.env.sink.caught(&error);
		Ok(())
	}

	pub(crate) fn host_nodes(&self, out: &mut Vec<H::Node>) {
		for mounted in &self.state.borrow().added {
			mounted.host_nodes(out);
		}
	}

	pub(crate) fn first_host_node(&self) -> Option<H::Node> {
		first_of(&self.state.borrow().added)
	}

	pub(crate) fn teardown(&self, cx: Cx<'_, H>, parent: Option<&H::Node>) {
		let span = trace_span!("Removing boundary");
		let _enter = span.enter();
		let added = core::mem::take(&mut self.state.borrow_mut().added);
		for mounted in added {
			mounted.detach(cx, parent);
		}
	}
}
