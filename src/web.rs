//! The browser [`Host`], on top of [`web_sys`].
//!
//! DOM calls that fail are logged with [`error!`] and otherwise ignored, except element creation and markup parsing.

use crate::{
	error::Error,
	host::{Dispatch, Host, ListenerCleanup, NodeKind},
	scheduler::{Tick, TickQueue},
	style::HashedStyles,
};
use std::{borrow::Cow, rc::Rc};
use tracing::error;
use wasm_bindgen::{closure::Closure, throw_str, JsCast, JsValue};

fn host_error(error: JsValue) -> Error {
	Error::Host(format!("{:?}", error))
}

/// A [`web_sys::Document`] as reconciliation target.
#[derive(Debug, Clone)]
pub struct WebHost {
	document: web_sys::Document,
}
impl WebHost {
	#[must_use]
	pub fn new(document: web_sys::Document) -> Self {
		Self { document }
	}

	/// The document of the current window.
	///
	/// # Errors
	///
	/// [`Error::Host`] outside of a browser window.
	pub fn from_window() -> Result<Self, Error> {
		web_sys::window()
			.and_then(|window| window.document())
			.map(Self::new)
			.ok_or_else(|| Error::Host("no window document".to_owned()))
	}

	#[must_use]
	pub fn document(&self) -> &web_sys::Document {
		&self.document
	}

	/// [`HashedStyles`] whose sheet text is mirrored into a new `<style>` element in the document's head.
	///
	/// # Errors
	///
	/// [`Error::Host`] if the element can't be created or the document has no head.
	pub fn style_sheet(&self) -> Result<HashedStyles, Error> {
		let style = self.document.create_element("style").map_err(host_error)?;
		let head = self.document.head().ok_or_else(|| Error::Host("document has no head".to_owned()))?;
		head.append_child(&style).map_err(host_error)?;
		Ok(HashedStyles::with_sheet_writer(move |text| style.set_text_content(Some(text))))
	}
}

fn as_element<'a>(node: &'a web_sys::Node, action: &str) -> Option<&'a web_sys::Element> {
	let element = node.dyn_ref::<web_sys::Element>();
	if element.is_none() {
		error!("Expected an element to {} but found {:?}.", action, node);
	}
	element
}

impl Host for WebHost {
	type Node = web_sys::Node;

	fn create_element(&self, tag: &str) -> Result<web_sys::Node, Error> {
		self.document.create_element(tag).map(Into::into).map_err(host_error)
	}

	fn create_text(&self, data: &str) -> web_sys::Node {
		self.document.create_text_node(data).into()
	}

	fn create_comment(&self, data: &str) -> web_sys::Node {
		self.document.create_comment(data).into()
	}

	fn set_attribute(&self, element: &web_sys::Node, name: &str, value: &str) {
		if let Some(element) = as_element(element, "set an attribute") {
			if let Err(error) = element.set_attribute(name, value) {
				error!("Failed to set attribute {}: {:?}", name, error);
			}
		}
	}

	fn set_attribute_ns(&self, element: &web_sys::Node, namespace: &str, name: &str, value: &str) {
		if let Some(element) = as_element(element, "set an attribute") {
			if let Err(error) = element.set_attribute_ns(Some(namespace), name, value) {
				error!("Failed to set attribute {}: {:?}", name, error);
			}
		}
	}

	fn remove_attribute(&self, element: &web_sys::Node, name: &str) {
		if let Some(element) = as_element(element, "remove an attribute") {
			if let Err(error) = element.remove_attribute(name) {
				error!("Failed to remove attribute {}: {:?}", name, error);
			}
		}
	}

	fn remove_attribute_ns(&self, element: &web_sys::Node, namespace: &str, name: &str) {
		let local_name = name.split_once(':').map_or(name, |(_, local_name)| local_name);
		if let Some(element) = as_element(element, "remove an attribute") {
			if let Err(error) = element.remove_attribute_ns(Some(namespace), local_name) {
				error!("Failed to remove attribute {}: {:?}", name, error);
			}
		}
	}

	fn set_text(&self, node: &web_sys::Node, data: &str) {
		node.set_text_content(Some(data));
	}

	fn insert_before(&self, parent: &web_sys::Node, node: &web_sys::Node, anchor: Option<&web_sys::Node>) {
		if let Err(error) = parent.insert_before(node, anchor) {
			error!("Failed to insert node: {:?}", error);
		}
	}

	fn remove_child(&self, parent: &web_sys::Node, node: &web_sys::Node) {
		if let Err(error) = parent.remove_child(node) {
			error!("Failed to remove the node: {:?}", error);
		}
	}

	fn is_attached(&self, node: &web_sys::Node) -> bool {
		node.parent_node().is_some()
	}

	fn parent(&self, node: &web_sys::Node) -> Option<web_sys::Node> {
		node.parent_node()
	}

	fn first_child(&self, node: &web_sys::Node) -> Option<web_sys::Node> {
		node.first_child()
	}

	fn next_sibling(&self, node: &web_sys::Node) -> Option<web_sys::Node> {
		node.next_sibling()
	}

	fn inspect(&self, node: &web_sys::Node) -> NodeKind {
		match node.node_type() {
			web_sys::Node::ELEMENT_NODE => NodeKind::Element(node.unchecked_ref::<web_sys::Element>().local_name()),
			web_sys::Node::TEXT_NODE => NodeKind::Text(node.text_content().unwrap_or_default()),
			web_sys::Node::COMMENT_NODE => NodeKind::Comment(node.text_content().unwrap_or_default()),
			_ => NodeKind::Other,
		}
	}

	fn attributes(&self, element: &web_sys::Node) -> Vec<(String, String)> {
		let attributes = match element.dyn_ref::<web_sys::Element>() {
			Some(element) => element.attributes(),
			None => return Vec::new(),
		};
		(0..attributes.length())
			.filter_map(|i| attributes.item(i))
			.map(|attribute| (attribute.name(), attribute.value()))
			.collect()
	}

	fn bind_events(&self, target: &web_sys::Node, names: &[Cow<'static, str>], dispatch: Dispatch) -> ListenerCleanup {
		let listeners: Vec<(Cow<'static, str>, Closure<dyn Fn(web_sys::Event)>)> = names
			.iter()
			.map(|name| {
				let dispatch = Rc::clone(&dispatch);
				let event_name = name.clone();
				let closure = Closure::wrap(Box::new(move |event: web_sys::Event| dispatch(&event_name, &event)) as Box<dyn Fn(web_sys::Event)>);
				if let Err(error) = target.add_event_listener_with_callback(name, closure.as_ref().unchecked_ref()) {
					error!("Failed to add {} listener: {:?}", name, error);
				}
				(name.clone(), closure)
			})
			.collect();
		let target = target.clone();
		ListenerCleanup::new(move || {
			for (name, closure) in listeners {
				if let Err(error) = target.remove_event_listener_with_callback(&name, closure.as_ref().unchecked_ref()) {
					error!("Failed to remove {} listener: {:?}", name, error);
				}
			}
		})
	}

	fn parse_markup(&self, markup: &str) -> Result<web_sys::Node, Error> {
		let template: web_sys::HtmlTemplateElement = self
			.document
			.create_element("template")
			.map_err(host_error)?
			.dyn_into()
			.map_err(|element| Error::Host(format!("expected a template element but got {:?}", element)))?;
		template.set_inner_html(markup);
		Ok(template.content().into())
	}
}

/// Runs ticks as microtasks, right after the current task completes.
///
/// A failing tick is rethrown into the browser's unhandled rejection reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrotaskTicks;
impl TickQueue for MicrotaskTicks {
	fn request(&self, tick: Tick) {
		let callback = Closure::once(move |_: JsValue| {
			if let Err(error) = tick() {
				error!("Scheduling tick failed: {}", error);
				throw_str(&error.to_string());
			}
		});
		let _ = js_sys::Promise::resolve(&JsValue::UNDEFINED).then(&callback);
		callback.forget();
	}
}
