//! Insertion and diffing of virtual nodes against the committed tree.
//!
//! Host nodes are built top-down: an element is inserted before its children are. Every failing step cleans up what it
//! inserted so far, so an error leaves no orphaned host nodes and the committed tree stays consistent.

use crate::{
	boundary::CatchBoundary,
	children,
	component::ComponentInstance,
	element::AttrValue,
	env::Env,
	error::Error,
	events::ListenerSet,
	frame::FrameContext,
	host::{attribute_namespace, Host},
	hydrate::Cursor,
	mounted::{live_anchor, Mounted, MountedElement, MountedFragment, MountedText, Owner},
	scheduler::Scheduler,
	vnode::{FragmentNode, HostNode, TextNode, VNode},
};
use std::{borrow::Cow, rc::Rc};
use tracing::{error, trace, trace_span, warn};

/// The environment of one reconciliation pass.
pub(crate) struct Cx<'a, H: Host> {
	pub(crate) env: &'a Rc<Env<H>>,
	pub(crate) scheduler: &'a Rc<Scheduler<H>>,
	depth: usize,
}
impl<H: Host> Clone for Cx<'_, H> {
	fn clone(&self) -> Self {
		*self
	}
}
impl<H: Host> Copy for Cx<'_, H> {}
impl<'a, H: Host> Cx<'a, H> {
	pub(crate) fn new(env: &'a Rc<Env<H>>, scheduler: &'a Rc<Scheduler<H>>) -> Self {
		Self { env, scheduler, depth: 0 }
	}

	pub(crate) fn host(self) -> &'a H {
		&self.env.host
	}

	/// Same depth, different scheduler. Used when entering a frame.
	pub(crate) fn with_scheduler<'b>(self, scheduler: &'b Rc<Scheduler<H>>) -> Cx<'b, H>
	where
		'a: 'b,
	{
		Cx {
			env: self.env,
			scheduler,
			depth: self.depth,
		}
	}

	fn deeper(self) -> Result<Self, Error> {
		if self.depth >= self.env.depth_limit {
			error!("Depth limit of {} reached.", self.env.depth_limit);
			return Err(Error::DepthLimit);
		}
		Ok(Self {
			depth: self.depth + 1,
			..self
		})
	}
}

/// Commits `node` fresh before `anchor`, or claims existing host nodes from `cursor` if one is given.
pub(crate) fn insert<H: Host>(
	cx: Cx<'_, H>,
	node: VNode,
	parent: &H::Node,
	anchor: Option<&H::Node>,
	owner: &Owner<H>,
	cursor: Option<&mut Cursor<H>>,
) -> Result<Mounted<H>, Error> {
	let cx = cx.deeper()?;
	match node {
		VNode::Text(TextNode { value }) => Ok(Mounted::Text(insert_text(cx, value, parent, anchor, cursor))),
		VNode::Host(node) => insert_element(cx, node, parent, anchor, owner, cursor).map(Mounted::Element),
		VNode::Fragment(FragmentNode { key, children }) => {
			let span = trace_span!("Creating fragment", "children.len()" = children.len());
			let _enter = span.enter();
			let mut mounted = Vec::with_capacity(children.len());
			insert_all(cx, children, &mut mounted, parent, anchor, owner, cursor)?;
			Ok(Mounted::Fragment(MountedFragment { key, children: mounted }))
		}
		VNode::Component(node) => ComponentInstance::mount(cx, node, parent, anchor, owner, cursor).map(Mounted::Component),
		VNode::Catch(node) => CatchBoundary::mount(cx, node, parent, anchor, owner, cursor).map(Mounted::Catch),
		VNode::Frame(node) => FrameContext::mount(cx, node, parent, anchor, owner, cursor).map(Mounted::Frame),
	}
}

/// Inserts `nodes` in order, appending them to `into`.
/// If one fails, everything this call inserted is removed again.
/// Duplicate keys fail before anything is inserted.
pub(crate) fn insert_all<H: Host>(
	cx: Cx<'_, H>,
	nodes: Vec<VNode>,
	into: &mut Vec<Mounted<H>>,
	parent: &H::Node,
	anchor: Option<&H::Node>,
	owner: &Owner<H>,
	mut cursor: Option<&mut Cursor<H>>,
) -> Result<(), Error> {
	children::check_keys(&nodes)?;
	let start = into.len();
	for node in nodes {
		match insert(cx, node, parent, anchor, owner, cursor.as_deref_mut()) {
			Ok(mounted) => into.push(mounted),
			Err(error) => {
				for mounted in into.drain(start..) {
					mounted.detach(cx, Some(parent));
				}
				return Err(error);
			}
		}
	}
	Ok(())
}

fn insert_text<H: Host>(cx: Cx<'_, H>, value: String, parent: &H::Node, anchor: Option<&H::Node>, cursor: Option<&mut Cursor<H>>) -> MountedText<H> {
	// Empty text has no host node, neither fresh nor hydrated.
	if value.is_empty() {
		return MountedText { value, node: None };
	}
	let host = cx.host();
	let anchor = match cursor {
		Some(cursor) => match cursor.claim_text(host, &value) {
			Some(node) => return MountedText { value, node: Some(node) },
			None => cursor.anchor(),
		},
		None => anchor.cloned(),
	};
	MountedText {
		node: Some(create_text(host, &value, parent, anchor.as_ref())),
		value,
	}
}

fn create_text<H: Host>(host: &H, value: &str, parent: &H::Node, anchor: Option<&H::Node>) -> H::Node {
	let span = trace_span!("Creating text node");
	let _enter = span.enter();
	let node = host.create_text(value);
	host.insert_before(parent, &node, anchor);
	node
}

fn insert_element<H: Host>(
	cx: Cx<'_, H>,
	node: HostNode,
	parent: &H::Node,
	anchor: Option<&H::Node>,
	owner: &Owner<H>,
	mut cursor: Option<&mut Cursor<H>>,
) -> Result<Box<MountedElement<H>>, Error> {
	let HostNode {
		tag,
		key,
		attributes,
		style,
		events,
		children,
	} = node;
	let span = trace_span!("Creating element", %tag);
	let _enter = span.enter();
	let host = cx.host();

	let claimed = match cursor.as_deref_mut() {
		Some(cursor) => cursor.claim_element(host, &tag),
		None => None,
	};
	let hydrating = claimed.is_some();
	let element = match claimed {
		Some(existing) => existing,
		None => host.create_element(&tag)?,
	};

	let style_class = style.as_ref().map(|style| cx.env.styles.acquire(style));
	let attributes = with_style_class(attributes, style_class.as_deref());
	if hydrating {
		let repaired = hydrate_attributes(host, &element, &attributes);
		if let (Some(cursor), true) = (cursor.as_deref(), repaired > 0) {
			cursor.count_mismatches(repaired);
		}
	} else {
		for (name, value) in &attributes {
			if let Some(value) = value.to_host() {
				set_attribute(host, &element, name, &value);
			}
		}
		let anchor = match cursor.as_deref() {
			Some(cursor) => cursor.anchor(),
			None => anchor.cloned(),
		};
		host.insert_before(parent, &element, anchor.as_ref());
	}

	let mut mounted = Box::new(MountedElement {
		tag,
		key,
		attributes,
		style_class,
		listeners: ListenerSet::bind(host, &element, events),
		children: Vec::with_capacity(children.len()),
		node: element,
	});

	let mut nested = match (hydrating, cursor.as_deref()) {
		(true, Some(cursor)) => Some(cursor.nested(host, &mounted.node)),
		_ => None,
	};
	match insert_all(cx, children, &mut mounted.children, &mounted.node, None, owner, nested.as_mut()) {
		Ok(()) => {
			if let Some(nested) = &mut nested {
				nested.finish(host);
			}
			Ok(mounted)
		}
		Err(error) => {
			Mounted::Element(mounted).detach(cx, Some(parent));
			Err(error)
		}
	}
}

/// Diffs `next` into `slot`, replacing it outright if the two are not comparable.
pub(crate) fn diff<H: Host>(
	cx: Cx<'_, H>,
	slot: &mut Mounted<H>,
	next: VNode,
	parent: &H::Node,
	anchor: Option<&H::Node>,
	owner: &Owner<H>,
) -> Result<(), Error> {
	let cx = cx.deeper()?;
	let rebuild = match (&*slot, &next) {
		(Mounted::Catch(boundary), VNode::Catch(next)) => boundary.must_rebuild(&next.children),
		_ => !slot.comparable(&next),
	};
	if rebuild {
		return replace(cx, slot, next, parent, anchor, owner);
	}

	match (slot, next) {
		(Mounted::Text(text), VNode::Text(next)) => {
			let span = trace_span!("Diffing text node");
			let _enter = span.enter();
			if text.value != next.value {
				let host = cx.host();
				match &text.node {
					Some(node) => host.set_text(node, &next.value),
					None => {
						let anchor = live_anchor(host, parent, anchor.cloned());
						text.node = Some(create_text(host, &next.value, parent, anchor.as_ref()));
					}
				}
				text.value = next.value;
			}
			Ok(())
		}
		(Mounted::Element(element), VNode::Host(next)) => diff_element(cx, element, next, owner),
		(Mounted::Fragment(fragment), VNode::Fragment(next)) => {
			let span = trace_span!("Diffing fragment");
			let _enter = span.enter();
			fragment.key = next.key;
			children::reconcile(cx, &mut fragment.children, next.children, parent, anchor, owner)
		}
		(Mounted::Component(instance), VNode::Component(next)) => instance.update(cx, next, parent, anchor),
		(Mounted::Catch(boundary), VNode::Catch(next)) => boundary.diff(cx, next, parent, anchor),
		(Mounted::Frame(frame), VNode::Frame(next)) => frame.diff(cx, next, parent),
		(slot, next) => Err(Error::invariant(format!(
			"cannot diff {:?} against {:?}",
			slot.kind(),
			next.kind()
		))),
	}
}

/// Inserts `next` where `slot` is, then removes what `slot` held.
fn replace<H: Host>(
	cx: Cx<'_, H>,
	slot: &mut Mounted<H>,
	next: VNode,
	parent: &H::Node,
	anchor: Option<&H::Node>,
	owner: &Owner<H>,
) -> Result<(), Error> {
	let span = trace_span!("Replacing node", from = ?slot.kind(), to = ?next.kind());
	let _enter = span.enter();
	let position = slot
		.first_host_node()
		.or_else(|| live_anchor(cx.host(), parent, anchor.cloned()));
	let fresh = insert(cx, next, parent, position.as_ref(), owner, None)?;
	core::mem::replace(slot, fresh).detach(cx, Some(parent));
	Ok(())
}

fn diff_element<H: Host>(cx: Cx<'_, H>, element: &mut MountedElement<H>, next: HostNode, owner: &Owner<H>) -> Result<(), Error> {
	let span = trace_span!("Diffing element", tag = %element.tag);
	let _enter = span.enter();
	let host = cx.host();
	let HostNode {
		key,
		attributes,
		style,
		events,
		children,
		..
	} = next;

	// Acquired before releasing, so an unchanged style never round-trips through the bridge.
	let style_class = style.as_ref().map(|style| cx.env.styles.acquire(style));
	if let Some(previous) = core::mem::replace(&mut element.style_class, style_class) {
		cx.env.styles.release(&previous);
	}

	let attributes = with_style_class(attributes, element.style_class.as_deref());
	diff_attributes(host, &element.node, &element.attributes, &attributes);
	element.attributes = attributes;
	element.key = key;

	ListenerSet::update(&mut element.listeners, host, &element.node, events);
	children::reconcile(cx, &mut element.children, children, &element.node, None, owner)
}

/// Merges a generated style class into the `class` attribute.
fn with_style_class(mut attributes: Vec<(Cow<'static, str>, AttrValue)>, class: Option<&str>) -> Vec<(Cow<'static, str>, AttrValue)> {
	let class = match class {
		Some(class) => class,
		None => return attributes,
	};
	match attributes.iter_mut().find(|(name, _)| *name == "class") {
		Some((_, value)) => {
			let merged = match value.to_host() {
				Some(existing) if !existing.is_empty() => format!("{} {}", existing, class),
				_ => class.to_owned(),
			};
			*value = AttrValue::Str(merged);
		}
		None => attributes.push((Cow::Borrowed("class"), AttrValue::Str(class.to_owned()))),
	}
	attributes
}

fn diff_attributes<H: Host>(host: &H, element: &H::Node, old: &[(Cow<'static, str>, AttrValue)], new: &[(Cow<'static, str>, AttrValue)]) {
	for (name, value) in old {
		if value.to_host().is_some() && !new.iter().any(|(n, v)| n == name && v.to_host().is_some()) {
			trace!("Removing attribute {}.", name);
			remove_attribute(host, element, name);
		}
	}
	for (name, value) in new {
		if let Some(value) = value.to_host() {
			let previous = old.iter().find(|(n, _)| n == name).and_then(|(_, v)| v.to_host());
			if previous.as_deref() != Some(&*value) {
				set_attribute(host, element, name, &value);
			}
		}
	}
}

/// Brings a claimed element's attributes in line with `desired`. Returns the number of repairs.
fn hydrate_attributes<H: Host>(host: &H, element: &H::Node, desired: &[(Cow<'static, str>, AttrValue)]) -> usize {
	let existing = host.attributes(element);
	let mut repaired = 0;
	for (name, value) in desired {
		let found = existing.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str());
		match (value.to_host(), found) {
			(Some(value), Some(found)) if value == found => (),
			(Some(value), found) => {
				if cfg!(feature = "dangerous-logging") {
					warn!("Unexpected attribute {}: Expected {:?} but found {:?}. Overwriting.", name, value, found);
				} else {
					warn!("Unexpected value of attribute {}. Overwriting.", name);
				}
				set_attribute(host, element, name, &value);
				repaired += 1;
			}
			(None, Some(_)) => {
				warn!("Unexpected attribute {}. Removing it.", name);
				remove_attribute(host, element, name);
				repaired += 1;
			}
			(None, None) => (),
		}
	}
	for (name, _) in &existing {
		if !desired.iter().any(|(n, _)| n == name) {
			warn!("Unexpected attribute {}. Removing it.", name);
			remove_attribute(host, element, name);
			repaired += 1;
		}
	}
	repaired
}

fn set_attribute<H: Host>(host: &H, element: &H::Node, name: &str, value: &str) {
	match attribute_namespace(name) {
		Some(namespace) => host.set_attribute_ns(element, namespace, name, value),
		None => host.set_attribute(element, name, value),
	}
}

fn remove_attribute<H: Host>(host: &H, element: &H::Node, name: &str) {
	match attribute_namespace(name) {
		Some(namespace) => host.remove_attribute_ns(element, namespace, name),
		None => host.remove_attribute(element, name),
	}
}
