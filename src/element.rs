//! Render output as produced by callers and components, before normalization.
//!
//! Anything a component may return is an [`Output`]: nothing, a boolean, a number, a string, a list, or an
//! [`Element`] descriptor. [`VNode::normalize`](`crate::vnode::VNode::normalize`) turns it into the tagged variant tree.

use crate::{component::ComponentType, error::Error, events::Event, vnode::VNode};
use core::fmt::{self, Debug, Display, Formatter};
use serde::Deserialize;
use std::{borrow::Cow, rc::Rc};

/// Explicit identity of a child within its list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
	Int(i64),
	Str(Cow<'static, str>),
}
impl Display for Key {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Key::Int(i) => Display::fmt(i, f),
			Key::Str(s) => Display::fmt(s, f),
		}
	}
}
impl From<i64> for Key {
	fn from(i: i64) -> Self {
		Self::Int(i)
	}
}
impl From<i32> for Key {
	fn from(i: i32) -> Self {
		Self::Int(i.into())
	}
}
impl From<u32> for Key {
	fn from(i: u32) -> Self {
		Self::Int(i.into())
	}
}
impl From<&'static str> for Key {
	fn from(s: &'static str) -> Self {
		Self::Str(Cow::Borrowed(s))
	}
}
impl From<String> for Key {
	fn from(s: String) -> Self {
		Self::Str(Cow::Owned(s))
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
	Str(String),
	Number(f64),
	/// `true` is rendered as a present, empty attribute; `false` as an absent one.
	///
	/// Booleans take part in attribute diffing like any other value, so flipping one sets or removes the attribute.
	/// Nothing is routed to DOM properties instead.
	Bool(bool),
	Null,
}
impl AttrValue {
	/// The host attribute value, or [`None`] if the attribute should be absent.
	#[must_use]
	pub fn to_host(&self) -> Option<Cow<'_, str>> {
		match self {
			AttrValue::Str(s) => Some(Cow::Borrowed(s)),
			AttrValue::Number(n) => Some(Cow::Owned(format_number(*n))),
			AttrValue::Bool(true) => Some(Cow::Borrowed("")),
			AttrValue::Bool(false) | AttrValue::Null => None,
		}
	}
}
impl From<&str> for AttrValue {
	fn from(s: &str) -> Self {
		Self::Str(s.to_owned())
	}
}
impl From<String> for AttrValue {
	fn from(s: String) -> Self {
		Self::Str(s)
	}
}
impl From<bool> for AttrValue {
	fn from(b: bool) -> Self {
		Self::Bool(b)
	}
}
impl From<f64> for AttrValue {
	fn from(n: f64) -> Self {
		Self::Number(n)
	}
}
impl From<i32> for AttrValue {
	fn from(n: i32) -> Self {
		Self::Number(n.into())
	}
}
impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::Null, Into::into)
	}
}

/// Integral numbers are printed without a fractional part, like a browser would stringify them.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn format_number(n: f64) -> String {
	if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
		format!("{}", n as i64)
	} else {
		format!("{}", n)
	}
}

/// A style object, compiled into a generated class name by the [`StyleBridge`](`crate::style::StyleBridge`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StyleObject(pub(crate) Vec<(String, String)>);
impl StyleObject {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn set(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
		let property = property.into();
		let value = value.into();
		match self.0.iter_mut().find(|(p, _)| *p == property) {
			Some(existing) => existing.1 = value,
			None => self.0.push((property, value)),
		}
		self
	}

	pub fn declarations(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(p, v)| (p.as_str(), v.as_str()))
	}
}

/// An event listener declaration on a host element.
#[derive(Clone)]
pub struct EventDescriptor {
	pub name: Cow<'static, str>,
	pub(crate) handler: Rc<dyn Fn(&Event<'_>)>,
}
impl Debug for EventDescriptor {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventDescriptor").field("name", &self.name).finish_non_exhaustive()
	}
}

/// What a [`Catch`](catch) boundary shows after one of its children failed.
#[derive(Clone)]
pub enum Fallback {
	Output(Box<Output>),
	Render(Rc<dyn Fn(&Error) -> Output>),
}
impl Fallback {
	pub(crate) fn produce(&self, error: &Error) -> Output {
		match self {
			Fallback::Output(output) => (**output).clone(),
			Fallback::Render(render) => render(error),
		}
	}
}
impl Debug for Fallback {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Fallback::Output(output) => f.debug_tuple("Output").field(output).finish(),
			Fallback::Render(_) => f.write_str("Render(..)"),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
	#[default]
	Ready,
	Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameProps {
	pub id: String,
	pub src: Option<String>,
	pub status: FrameStatus,
}

/// Arbitrary render output.
#[derive(Debug, Clone)]
pub enum Output {
	Null,
	Bool(bool),
	Number(f64),
	Str(String),
	List(Vec<Output>),
	Element(Box<Element>),
	/// A structured value that is not an element descriptor. Normalizing it is an invariant violation.
	Raw(serde_json::Value),
	/// An already normalized node, passed through unchanged.
	Node(Box<VNode>),
}
impl Default for Output {
	fn default() -> Self {
		Self::Null
	}
}
impl From<()> for Output {
	fn from((): ()) -> Self {
		Self::Null
	}
}
impl From<bool> for Output {
	fn from(b: bool) -> Self {
		Self::Bool(b)
	}
}
impl From<f64> for Output {
	fn from(n: f64) -> Self {
		Self::Number(n)
	}
}
impl From<i32> for Output {
	fn from(n: i32) -> Self {
		Self::Number(n.into())
	}
}
impl From<u32> for Output {
	fn from(n: u32) -> Self {
		Self::Number(n.into())
	}
}
impl From<&str> for Output {
	fn from(s: &str) -> Self {
		Self::Str(s.to_owned())
	}
}
impl From<String> for Output {
	fn from(s: String) -> Self {
		Self::Str(s)
	}
}
impl From<VNode> for Output {
	fn from(node: VNode) -> Self {
		Self::Node(Box::new(node))
	}
}
impl From<Element> for Output {
	fn from(element: Element) -> Self {
		Self::Element(Box::new(element))
	}
}
impl<T: Into<Output>> From<Vec<T>> for Output {
	fn from(items: Vec<T>) -> Self {
		Self::List(items.into_iter().map(Into::into).collect())
	}
}
impl<T: Into<Output>> From<Option<T>> for Output {
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::Null, Into::into)
	}
}
impl From<serde_json::Value> for Output {
	fn from(value: serde_json::Value) -> Self {
		use serde_json::Value;
		match value {
			Value::Null => Self::Null,
			Value::Bool(b) => Self::Bool(b),
			Value::Number(n) => n.as_f64().map_or(Self::Raw(Value::Number(n)), Self::Number),
			Value::String(s) => Self::Str(s),
			Value::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
			object @ Value::Object(_) => Self::Raw(object),
		}
	}
}

#[derive(Debug, Clone)]
pub enum ElementType {
	Tag(Cow<'static, str>),
	Fragment,
	Catch,
	Frame,
	Component(ComponentType),
}

#[derive(Debug, Clone, Default)]
pub struct Props {
	pub key: Option<Key>,
	pub attributes: Vec<(Cow<'static, str>, AttrValue)>,
	pub on: Vec<EventDescriptor>,
	pub style: Option<StyleObject>,
	pub fallback: Option<Fallback>,
	/// Component props.
	pub data: serde_json::Value,
	pub frame: Option<FrameProps>,
}

/// An element descriptor: the marked, structured form of render output.
#[derive(Debug, Clone)]
pub struct Element {
	pub ty: ElementType,
	pub props: Props,
	pub children: Vec<Output>,
}
impl Element {
	#[must_use]
	pub fn new(ty: ElementType) -> Self {
		Self {
			ty,
			props: Props::default(),
			children: Vec::new(),
		}
	}

	#[must_use]
	pub fn key(mut self, key: impl Into<Key>) -> Self {
		self.props.key = Some(key.into());
		self
	}

	#[must_use]
	pub fn attr(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<AttrValue>) -> Self {
		self.props.attributes.push((name.into(), value.into()));
		self
	}

	#[must_use]
	pub fn on(mut self, name: impl Into<Cow<'static, str>>, handler: impl Fn(&Event<'_>) + 'static) -> Self {
		self.props.on.push(EventDescriptor {
			name: name.into(),
			handler: Rc::new(handler),
		});
		self
	}

	#[must_use]
	pub fn style(mut self, style: StyleObject) -> Self {
		self.props.style = Some(style);
		self
	}

	#[must_use]
	pub fn child(mut self, child: impl Into<Output>) -> Self {
		self.children.push(child.into());
		self
	}

	#[must_use]
	pub fn children<I>(mut self, children: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<Output>,
	{
		self.children.extend(children.into_iter().map(Into::into));
		self
	}

	/// Sets the source a [`frame`] reloads its content from.
	#[must_use]
	pub fn src(mut self, src: impl Into<String>) -> Self {
		if let Some(frame) = &mut self.props.frame {
			frame.src = Some(src.into());
		}
		self
	}

	/// Marks a [`frame`] as waiting for streamed content.
	#[must_use]
	pub fn pending(mut self) -> Self {
		if let Some(frame) = &mut self.props.frame {
			frame.status = FrameStatus::Pending;
		}
		self
	}
}

/// A host element with the given tag name.
#[must_use]
pub fn h(tag: impl Into<Cow<'static, str>>) -> Element {
	Element::new(ElementType::Tag(tag.into()))
}

#[must_use]
pub fn fragment<I>(children: I) -> Element
where
	I: IntoIterator,
	I::Item: Into<Output>,
{
	Element::new(ElementType::Fragment).children(children)
}

/// An error boundary showing `fallback` if rendering any of its children fails.
#[must_use]
pub fn catch(fallback: impl Into<Output>) -> Element {
	let mut element = Element::new(ElementType::Catch);
	element.props.fallback = Some(Fallback::Output(Box::new(fallback.into())));
	element
}

/// An error boundary whose fallback is computed from the error.
#[must_use]
pub fn catch_with(fallback: impl Fn(&Error) -> Output + 'static) -> Element {
	let mut element = Element::new(ElementType::Catch);
	element.props.fallback = Some(Fallback::Render(Rc::new(fallback)));
	element
}

#[must_use]
pub fn component(ty: &ComponentType, data: serde_json::Value) -> Element {
	let mut element = Element::new(ElementType::Component(ty.clone()));
	element.props.data = data;
	element
}

/// An island boundary with its own scheduler, addressable by `id`.
#[must_use]
pub fn frame(id: impl Into<String>) -> Element {
	let mut element = Element::new(ElementType::Frame);
	element.props.frame = Some(FrameProps {
		id: id.into(),
		src: None,
		status: FrameStatus::Ready,
	});
	element
}
