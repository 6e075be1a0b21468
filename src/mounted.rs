//! The committed tree: virtual nodes bound to live host state.
//!
//! Ownership runs strictly top-down. Parent links ([`Owner`]) are weak and only walked to find the nearest enclosing
//! component or [`Catch`](`crate::element::catch`) boundary, never for teardown.

use crate::{
	boundary::CatchBoundary,
	component::{ComponentInstance, InstanceCore},
	element::{AttrValue, Key},
	error::Error,
	events::ListenerSet,
	frame::FrameContext,
	host::Host,
	reconcile::Cx,
	vnode::{Kind, VNode},
};
use std::{
	borrow::Cow,
	rc::{Rc, Weak},
};
use tracing::{error, trace_span};

pub(crate) enum Mounted<H: Host> {
	Text(MountedText<H>),
	Element(Box<MountedElement<H>>),
	Fragment(MountedFragment<H>),
	Component(Rc<ComponentInstance<H>>),
	Catch(Rc<CatchBoundary<H>>),
	Frame(Rc<FrameContext<H>>),
}

pub(crate) struct MountedText<H: Host> {
	pub(crate) value: String,
	/// [`None`] while `value` is empty and was never shown.
	pub(crate) node: Option<H::Node>,
}

pub(crate) struct MountedElement<H: Host> {
	pub(crate) tag: Cow<'static, str>,
	pub(crate) key: Option<Key>,
	/// As applied to the host, including the generated style class.
	pub(crate) attributes: Vec<(Cow<'static, str>, AttrValue)>,
	pub(crate) style_class: Option<String>,
	pub(crate) listeners: Option<ListenerSet>,
	pub(crate) children: Vec<Mounted<H>>,
	pub(crate) node: H::Node,
}

pub(crate) struct MountedFragment<H: Host> {
	pub(crate) key: Option<Key>,
	pub(crate) children: Vec<Mounted<H>>,
}

/// Where a dynamically re-rendered subtree lives: its host parent, and the host node following it.
pub(crate) struct Placement<H: Host> {
	pub(crate) parent: H::Node,
	pub(crate) anchor: Option<H::Node>,
}
impl<H: Host> Clone for Placement<H> {
	fn clone(&self) -> Self {
		Self {
			parent: self.parent.clone(),
			anchor: self.anchor.clone(),
		}
	}
}

/// The nearest enclosing component instance, error boundary or frame.
pub(crate) enum Owner<H: Host> {
	Root,
	Component(Weak<ComponentInstance<H>>),
	Catch(Weak<CatchBoundary<H>>),
	/// Frames pass context through, but errors raised within them never leave them.
	Frame(Weak<FrameContext<H>>),
}
impl<H: Host> Clone for Owner<H> {
	fn clone(&self) -> Self {
		match self {
			Owner::Root => Owner::Root,
			Owner::Component(instance) => Owner::Component(Weak::clone(instance)),
			Owner::Catch(boundary) => Owner::Catch(Weak::clone(boundary)),
			Owner::Frame(frame) => Owner::Frame(Weak::clone(frame)),
		}
	}
}
impl<H: Host> Owner<H> {
	pub(crate) fn component_core(&self) -> Option<Rc<InstanceCore>> {
		match self {
			Owner::Root => None,
			Owner::Component(instance) => instance.upgrade().map(|instance| Rc::clone(&instance.core)),
			Owner::Catch(boundary) => boundary.upgrade()?.owner.component_core(),
			Owner::Frame(frame) => frame.upgrade()?.owner.component_core(),
		}
	}

	pub(crate) fn nearest_boundary(&self) -> Option<Rc<CatchBoundary<H>>> {
		match self {
			Owner::Root | Owner::Frame(_) => None,
			Owner::Component(instance) => instance.upgrade()?.owner.nearest_boundary(),
			Owner::Catch(boundary) => boundary.upgrade(),
		}
	}

	/// Hands a render error that surfaced outside of a reconciliation pass to the nearest boundary, or the error sink.
	pub(crate) fn recover(&self, cx: Cx<'_, H>, error: Error) -> Result<(), Error> {
		if error.is_fatal() {
			return Err(error);
		}
		match self.nearest_boundary() {
			Some(boundary) => boundary.trip(cx, error),
			None => {
				cx.env.sink.report(&error);
				Ok(())
			}
		}
	}
}

/// `anchor`, if it is still a child of `parent`.
pub(crate) fn live_anchor<H: Host>(host: &H, parent: &H::Node, anchor: Option<H::Node>) -> Option<H::Node> {
	anchor.filter(|anchor| host.parent(anchor).as_ref() == Some(parent))
}

impl<H: Host> Mounted<H> {
	pub(crate) fn kind(&self) -> Kind {
		match self {
			Mounted::Text(_) => Kind::Text,
			Mounted::Element(_) => Kind::Host,
			Mounted::Fragment(_) => Kind::Fragment,
			Mounted::Component(_) => Kind::Component,
			Mounted::Catch(_) => Kind::Catch,
			Mounted::Frame(_) => Kind::Frame,
		}
	}

	pub(crate) fn key(&self) -> Option<&Key> {
		match self {
			Mounted::Text(_) => None,
			Mounted::Element(element) => element.key.as_ref(),
			Mounted::Fragment(fragment) => fragment.key.as_ref(),
			Mounted::Component(instance) => instance.key.as_ref(),
			Mounted::Catch(boundary) => boundary.key.as_ref(),
			Mounted::Frame(frame) => frame.key.as_ref(),
		}
	}

	/// Whether `next` can be diffed into this node instead of replacing it.
	pub(crate) fn comparable(&self, next: &VNode) -> bool {
		match (self, next) {
			(Mounted::Element(element), VNode::Host(next)) => element.tag == next.tag,
			(Mounted::Component(instance), VNode::Component(next)) => instance.is_of_type(&next.ty),
			(Mounted::Frame(frame), VNode::Frame(next)) => frame.id() == next.props.id,
			_ => self.kind() == next.kind(),
		}
	}

	/// Appends this node's top-level host nodes in document order.
	pub(crate) fn host_nodes(&self, out: &mut Vec<H::Node>) {
		match self {
			Mounted::Text(text) => {
				if let Some(node) = &text.node {
					out.push(node.clone());
				}
			}
			Mounted::Element(element) => out.push(element.node.clone()),
			Mounted::Fragment(fragment) => {
				for child in &fragment.children {
					child.host_nodes(out);
				}
			}
			Mounted::Component(instance) => {
				if let Some(child) = &*instance.child.borrow() {
					child.host_nodes(out);
				}
			}
			Mounted::Catch(boundary) => boundary.host_nodes(out),
			Mounted::Frame(frame) => frame.host_nodes(out),
		}
	}

	pub(crate) fn first_host_node(&self) -> Option<H::Node> {
		match self {
			Mounted::Text(text) => text.node.clone(),
			Mounted::Element(element) => Some(element.node.clone()),
			Mounted::Fragment(fragment) => first_of(&fragment.children),
			Mounted::Component(instance) => instance.child.borrow().as_ref().and_then(Mounted::first_host_node),
			Mounted::Catch(boundary) => boundary.first_host_node(),
			Mounted::Frame(frame) => Some(frame.start.clone()),
		}
	}

	/// Tears this node down. With a `parent`, its host nodes are also removed from it.
	/// Without one, an ancestor host node is being removed and only bindings are released.
	pub(crate) fn detach(self, cx: Cx<'_, H>, parent: Option<&H::Node>) {
		let host = cx.host();
		match self {
			Mounted::Text(text) => {
				let span = trace_span!("Removing text node");
				let _enter = span.enter();
				if let (Some(parent), Some(node)) = (parent, &text.node) {
					host.remove_child(parent, node);
				}
			}
			Mounted::Element(element) => {
				let MountedElement {
					tag,
					style_class,
					listeners,
					children,
					node,
					..
				} = *element;
				let span = trace_span!("Removing element", %tag);
				let _enter = span.enter();
				if let Some(listeners) = listeners {
					listeners.release();
				}
				if let Some(style_class) = style_class {
					cx.env.styles.release(&style_class);
				}
				for child in children {
					child.detach(cx, None);
				}
				if let Some(parent) = parent {
					host.remove_child(parent, &node);
				}
			}
			Mounted::Fragment(fragment) => {
				let span = trace_span!("Removing fragment", "children.len()" = fragment.children.len());
				let _enter = span.enter();
				for child in fragment.children {
					child.detach(cx, parent);
				}
			}
			Mounted::Component(instance) => instance.teardown(cx, parent),
			Mounted::Catch(boundary) => boundary.teardown(cx, parent),
			Mounted::Frame(frame) => frame.teardown(cx, parent),
		}
	}
}

pub(crate) fn first_of<H: Host>(list: &[Mounted<H>]) -> Option<H::Node> {
	list.iter().find_map(Mounted::first_host_node)
}

/// Moves `mounted` directly before `anchor`, unless it's already there apart from `stale` nodes in between.
pub(crate) fn place<H: Host>(host: &H, mounted: &Mounted<H>, parent: &H::Node, anchor: Option<&H::Node>, stale: &[H::Node]) -> bool {
	let mut nodes = Vec::new();
	mounted.host_nodes(&mut nodes);
	let last = match nodes.last() {
		Some(last) => last,
		None => return false,
	};
	if host.parent(last).as_ref() == Some(parent) {
		let mut next = host.next_sibling(last);
		while let Some(node) = next.take() {
			if stale.contains(&node) {
				next = host.next_sibling(&node);
			} else {
				next = Some(node);
				break;
			}
		}
		if next.as_ref() == anchor {
			return false;
		}
	} else {
		error!("Placed node is not a child of its list's host parent. Reinserting.");
	}
	for node in &nodes {
		host.insert_before(parent, node, anchor);
	}
	true
}
