//! The Host Adapter: everything the reconciler needs from the rendered document.

use crate::error::Error;
use core::{any::Any, fmt::Debug};
use std::{borrow::Cow, rc::Rc};

pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// The namespace of the few non-HTML attributes that must be set through [`Host::set_attribute_ns`].
#[must_use]
pub fn attribute_namespace(name: &str) -> Option<&'static str> {
	if name.starts_with("xlink:") {
		Some(XLINK_NAMESPACE)
	} else if name.starts_with("xml:") {
		Some(XML_NAMESPACE)
	} else if name == "xmlns" || name.starts_with("xmlns:") {
		Some(XMLNS_NAMESPACE)
	} else {
		None
	}
}

/// What an existing host node turned out to be, as far as hydration cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
	Element(String),
	Text(String),
	Comment(String),
	Other,
}

/// Called by the host with the event name and the platform's event object.
pub type Dispatch = Rc<dyn Fn(&str, &dyn Any)>;

/// Detaches event listeners installed by [`Host::bind_events`] when released or dropped.
#[must_use = "Dropping the cleanup handle detaches the listeners immediately."]
pub struct ListenerCleanup(Option<Box<dyn FnOnce()>>);
impl ListenerCleanup {
	pub fn new(cleanup: impl FnOnce() + 'static) -> Self {
		Self(Some(Box::new(cleanup)))
	}

	pub fn release(mut self) {
		if let Some(cleanup) = self.0.take() {
			cleanup();
		}
	}
}
impl Drop for ListenerCleanup {
	fn drop(&mut self) {
		if let Some(cleanup) = self.0.take() {
			cleanup();
		}
	}
}
impl Debug for ListenerCleanup {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_tuple("ListenerCleanup").field(&self.0.is_some()).finish()
	}
}

/// A rendered document the reconciler can mutate.
///
/// Node handles are cheap clones referring to the same underlying host node, and compare equal iff they do.
pub trait Host: 'static {
	type Node: Clone + PartialEq + Debug + 'static;

	/// # Errors
	///
	/// [`Error::Host`] if the host rejects the tag name.
	fn create_element(&self, tag: &str) -> Result<Self::Node, Error>;
	fn create_text(&self, data: &str) -> Self::Node;
	fn create_comment(&self, data: &str) -> Self::Node;

	fn set_attribute(&self, element: &Self::Node, name: &str, value: &str);
	fn set_attribute_ns(&self, element: &Self::Node, namespace: &str, name: &str, value: &str) {
		let _ = namespace;
		self.set_attribute(element, name, value);
	}
	fn remove_attribute(&self, element: &Self::Node, name: &str);
	/// `name` is the qualified name, prefix included.
	fn remove_attribute_ns(&self, element: &Self::Node, namespace: &str, name: &str) {
		let _ = namespace;
		self.remove_attribute(element, name);
	}

	fn set_text(&self, node: &Self::Node, data: &str);

	/// Inserts (or moves) `node` into `parent` before `anchor`, or at the end if `anchor` is [`None`].
	fn insert_before(&self, parent: &Self::Node, node: &Self::Node, anchor: Option<&Self::Node>);
	fn append_child(&self, parent: &Self::Node, node: &Self::Node) {
		self.insert_before(parent, node, None);
	}
	fn remove_child(&self, parent: &Self::Node, node: &Self::Node);

	/// Whether `node` currently has a parent.
	fn is_attached(&self, node: &Self::Node) -> bool;

	fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
	fn first_child(&self, node: &Self::Node) -> Option<Self::Node>;
	fn next_sibling(&self, node: &Self::Node) -> Option<Self::Node>;
	fn inspect(&self, node: &Self::Node) -> NodeKind;
	fn attributes(&self, element: &Self::Node) -> Vec<(String, String)>;

	/// The Event Bridge's `bind`: installs one listener per name that forwards to `dispatch`.
	fn bind_events(&self, target: &Self::Node, names: &[Cow<'static, str>], dispatch: Dispatch) -> ListenerCleanup;

	/// Parses `markup` into a detached container node whose children are the parsed nodes.
	///
	/// # Errors
	///
	/// [`Error::Host`] if the host can't parse markup or the markup is malformed.
	fn parse_markup(&self, markup: &str) -> Result<Self::Node, Error> {
		let _ = markup;
		Err(Error::Host("this host can't parse markup".to_owned()))
	}
}
