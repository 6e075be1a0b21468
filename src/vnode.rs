//! The normalized, tagged variant tree.
//!
//! A [`VNode`] is created fresh on every render pass and never mutated before it is committed.
//! Committing it against a host produces a [`Mounted`](`crate::mounted::Mounted`) that owns the host bindings.

use crate::{
	component::ComponentType,
	element::{format_number, AttrValue, ElementType, EventDescriptor, Fallback, FrameProps, Key, Output, StyleObject},
	error::Error,
};
use std::borrow::Cow;
use tracing::trace_span;

/// Pseudo-props that never reach the host as attributes.
const PSEUDO_PROPS: &[&str] = &["children", "key", "on"];

#[derive(Debug, Clone)]
pub enum VNode {
	Text(TextNode),
	Host(HostNode),
	Fragment(FragmentNode),
	Component(ComponentNode),
	Catch(CatchNode),
	Frame(FrameNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
	pub value: String,
}

#[derive(Debug, Clone)]
pub struct HostNode {
	pub tag: Cow<'static, str>,
	pub key: Option<Key>,
	pub attributes: Vec<(Cow<'static, str>, AttrValue)>,
	pub style: Option<StyleObject>,
	pub events: Vec<EventDescriptor>,
	pub children: Vec<VNode>,
}

#[derive(Debug, Clone, Default)]
pub struct FragmentNode {
	pub key: Option<Key>,
	pub children: Vec<VNode>,
}

/// An unevaluated component invocation.
#[derive(Debug, Clone)]
pub struct ComponentNode {
	pub ty: ComponentType,
	pub key: Option<Key>,
	pub props: serde_json::Value,
	pub children: Vec<VNode>,
}

#[derive(Debug, Clone)]
pub struct CatchNode {
	pub key: Option<Key>,
	pub children: Vec<VNode>,
	pub fallback: Fallback,
}

#[derive(Debug, Clone)]
pub struct FrameNode {
	pub key: Option<Key>,
	pub props: FrameProps,
	pub children: Vec<VNode>,
}

/// The variant tag of a [`VNode`], without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
	Text,
	Host,
	Fragment,
	Component,
	Catch,
	Frame,
}

impl VNode {
	#[must_use]
	pub fn text(value: impl Into<String>) -> Self {
		Self::Text(TextNode { value: value.into() })
	}

	/// Normalizes arbitrary render output into the variant tree.
	///
	/// # Errors
	///
	/// [`Error::InvariantViolation`] if `output` (or anything nested in it) is a structured value without the element marker,
	/// or a frame element without frame props.
	pub fn normalize(output: Output) -> Result<Self, Error> {
		Ok(match output {
			Output::Null | Output::Bool(_) => Self::text(""),
			Output::Number(n) => Self::text(format_number(n)),
			Output::Str(s) => Self::text(s),
			Output::List(items) => {
				let mut children = Vec::with_capacity(items.len());
				flatten_into(items, &mut children)?;
				Self::Fragment(FragmentNode { key: None, children })
			}
			Output::Node(node) => *node,
			Output::Raw(value) => return Err(Error::invariant(format!("cannot render a value without element marker: {}", value))),
			Output::Element(element) => {
				let element = *element;
				let mut props = element.props;
				let mut children = Vec::with_capacity(element.children.len());
				flatten_into(element.children, &mut children)?;
				match element.ty {
					ElementType::Tag(tag) => {
						let mut key = props.key;
						let mut attributes = Vec::with_capacity(props.attributes.len());
						for (name, value) in props.attributes {
							if name == "key" {
								if key.is_none() {
									key = value.to_host().map(|k| Key::from(k.into_owned()));
								}
							} else if !PSEUDO_PROPS.contains(&&*name) {
								attributes.push((name, value));
							}
						}
						Self::Host(HostNode {
							tag,
							key,
							attributes,
							style: props.style,
							events: props.on,
							children,
						})
					}
					ElementType::Fragment => Self::Fragment(FragmentNode { key: props.key, children }),
					ElementType::Catch => Self::Catch(CatchNode {
						key: props.key,
						children,
						fallback: props.fallback.take().unwrap_or_else(|| Fallback::Output(Box::new(Output::Null))),
					}),
					ElementType::Frame => Self::Frame(FrameNode {
						key: props.key,
						props: props.frame.take().ok_or_else(|| Error::invariant("frame element without frame props"))?,
						children,
					}),
					ElementType::Component(ty) => Self::Component(ComponentNode {
						ty,
						key: props.key,
						props: props.data,
						children,
					}),
				}
			}
		})
	}

	#[must_use]
	pub fn kind(&self) -> Kind {
		match self {
			VNode::Text(_) => Kind::Text,
			VNode::Host(_) => Kind::Host,
			VNode::Fragment(_) => Kind::Fragment,
			VNode::Component(_) => Kind::Component,
			VNode::Catch(_) => Kind::Catch,
			VNode::Frame(_) => Kind::Frame,
		}
	}

	#[must_use]
	pub fn key(&self) -> Option<&Key> {
		match self {
			VNode::Text(_) => None,
			VNode::Host(HostNode { key, .. })
			| VNode::Fragment(FragmentNode { key, .. })
			| VNode::Component(ComponentNode { key, .. })
			| VNode::Catch(CatchNode { key, .. })
			| VNode::Frame(FrameNode { key, .. }) => key.as_ref(),
		}
	}

	/// Structural comparison. Event handlers and fallbacks are not compared, only event names.
	#[must_use]
	pub fn same_as(&self, other: &VNode) -> bool {
		match (self, other) {
			(VNode::Text(a), VNode::Text(b)) => a == b,
			(VNode::Host(a), VNode::Host(b)) => {
				a.tag == b.tag
					&& a.key == b.key && a.attributes == b.attributes
					&& a.style == b.style && a.events.len() == b.events.len()
					&& a.events.iter().zip(&b.events).all(|(a, b)| a.name == b.name)
					&& same_children(&a.children, &b.children)
			}
			(VNode::Fragment(a), VNode::Fragment(b)) => a.key == b.key && same_children(&a.children, &b.children),
			(VNode::Component(a), VNode::Component(b)) => a.ty == b.ty && a.key == b.key && a.props == b.props && same_children(&a.children, &b.children),
			(VNode::Catch(a), VNode::Catch(b)) => a.key == b.key && same_children(&a.children, &b.children),
			(VNode::Frame(a), VNode::Frame(b)) => a.key == b.key && a.props == b.props && same_children(&a.children, &b.children),
			_ => false,
		}
	}
}

pub(crate) fn same_children(a: &[VNode], b: &[VNode]) -> bool {
	a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_as(b))
}

/// Nested lists are spliced into their parent's children.
fn flatten_into(items: Vec<Output>, children: &mut Vec<VNode>) -> Result<(), Error> {
	let span = trace_span!("Flattening children", "items.len()" = items.len());
	let _enter = span.enter();
	for item in items {
		match item {
			Output::List(nested) => flatten_into(nested, children)?,
			other => children.push(VNode::normalize(other)?),
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::element::{catch, fragment, h};
	use serde_json::json;

	#[test]
	fn primitives_become_text() {
		for (output, expected) in [
			(Output::Null, ""),
			(Output::Bool(true), ""),
			(Output::Bool(false), ""),
			(Output::from(3), "3"),
			(Output::from(1.5), "1.5"),
			(Output::from("hi"), "hi"),
		] {
			match VNode::normalize(output).unwrap() {
				VNode::Text(TextNode { value }) => assert_eq!(value, expected),
				other => panic!("expected text, got {:?}", other),
			}
		}
	}

	#[test]
	fn nested_lists_flatten() {
		let output = Output::from(vec![Output::from("a"), Output::from(vec![Output::from("b"), Output::from(vec!["c"])])]);
		match VNode::normalize(output).unwrap() {
			VNode::Fragment(FragmentNode { children, .. }) => assert_eq!(children.len(), 3),
			other => panic!("expected fragment, got {:?}", other),
		}
	}

	#[test]
	fn fragment_element_keeps_nested_fragments() {
		let output = Output::from(fragment(vec![Output::from(fragment(vec!["a", "b"])), Output::from("c")]));
		match VNode::normalize(output).unwrap() {
			VNode::Fragment(FragmentNode { children, .. }) => {
				assert_eq!(children.len(), 2);
				assert_eq!(children[0].kind(), Kind::Fragment);
			}
			other => panic!("expected fragment, got {:?}", other),
		}
	}

	#[test]
	fn raw_objects_are_rejected() {
		let error = VNode::normalize(Output::from(json!({ "type": "div" }))).unwrap_err();
		assert!(error.is_fatal());
	}

	#[test]
	fn pseudo_props_are_not_attributes() {
		let output = Output::from(h("li").attr("key", "k").attr("children", "x").attr("id", "a"));
		match VNode::normalize(output).unwrap() {
			VNode::Host(host) => {
				assert_eq!(host.key, Some(Key::from("k".to_owned())));
				assert_eq!(host.attributes.len(), 1);
				assert_eq!(host.attributes[0].0, "id");
			}
			other => panic!("expected host, got {:?}", other),
		}
	}

	#[test]
	fn catch_carries_fallback() {
		let output = Output::from(catch("error").child(h("div")));
		match VNode::normalize(output).unwrap() {
			VNode::Catch(node) => {
				assert_eq!(node.children.len(), 1);
				assert!(matches!(node.fallback, Fallback::Output(_)));
			}
			other => panic!("expected catch, got {:?}", other),
		}
	}

	#[test]
	fn same_as_ignores_handlers() {
		let a = VNode::normalize(h("button").on("click", |_| ()).child("x").into()).unwrap();
		let b = VNode::normalize(h("button").on("click", |_| ()).child("x").into()).unwrap();
		let c = VNode::normalize(h("button").child("y").into()).unwrap();
		assert!(a.same_as(&b));
		assert!(!a.same_as(&c));
	}
}
