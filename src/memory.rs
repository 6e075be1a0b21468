//! A headless [`Host`] backed by an in-memory document.
//!
//! Every mutation made through the [`Host`] interface is recorded as a [`Mutation`], which makes it possible to assert
//! exactly what a reconciliation pass did. Markup set through [`MemoryHost::set_inner_markup`] is not recorded.
//!
//! Serialized markup separates adjacent text nodes with an empty comment, so parsing it again yields the same text
//! nodes. Empty text nodes are left out.

use crate::{
	error::Error,
	host::{Dispatch, Host, ListenerCleanup, NodeKind},
};
use core::{any::Any, cell::RefCell};
use hashbrown::HashMap;
use std::{
	borrow::Cow,
	fmt::Write as _,
	rc::{Rc, Weak},
};
use tracing::{error, warn};

/// Handle of a node in a [`MemoryHost`]'s document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryNode(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
	CreateElement { node: MemoryNode, tag: String },
	CreateText { node: MemoryNode, data: String },
	CreateComment { node: MemoryNode, data: String },
	SetAttribute { element: MemoryNode, name: String, value: String },
	RemoveAttribute { element: MemoryNode, name: String },
	SetText { node: MemoryNode, data: String },
	Insert { parent: MemoryNode, node: MemoryNode, anchor: Option<MemoryNode> },
	Remove { parent: MemoryNode, node: MemoryNode },
}

#[derive(Debug)]
enum Data {
	Container,
	Element { tag: String, attributes: Vec<(String, String)> },
	Text(String),
	Comment(String),
}

#[derive(Debug)]
struct NodeData {
	data: Data,
	parent: Option<usize>,
	children: Vec<usize>,
}

struct Listener {
	id: u64,
	target: usize,
	names: Vec<Cow<'static, str>>,
	dispatch: Dispatch,
}

#[derive(Default)]
struct Document {
	nodes: Vec<NodeData>,
	mutations: Vec<Mutation>,
	listeners: Vec<Listener>,
	next_listener: u64,
}
impl Document {
	fn add(&mut self, data: Data) -> usize {
		self.nodes.push(NodeData {
			data,
			parent: None,
			children: Vec::new(),
		});
		self.nodes.len() - 1
	}

	fn detach(&mut self, node: usize) {
		if let Some(parent) = self.nodes[node].parent.take() {
			self.nodes[parent].children.retain(|child| *child != node);
		}
	}

	fn insert(&mut self, parent: usize, node: usize, anchor: Option<usize>) {
		self.detach(node);
		let children = &self.nodes[parent].children;
		let index = match anchor {
			None => children.len(),
			Some(anchor) => match children.iter().position(|child| *child == anchor) {
				Some(index) => index,
				None => {
					error!("Insertion anchor is not a child of the parent. Appending instead.");
					children.len()
				}
			},
		};
		self.nodes[parent].children.insert(index, node);
		self.nodes[node].parent = Some(parent);
	}

	fn tag(&self, node: usize) -> Option<&str> {
		match &self.nodes[node].data {
			Data::Element { tag, .. } => Some(tag.as_str()),
			_ => None,
		}
	}

	fn append_text(&mut self, parent: usize, text: &str) {
		if text.is_empty() {
			return;
		}
		if let Some(&last) = self.nodes[parent].children.last() {
			if let Data::Text(data) = &mut self.nodes[last].data {
				data.push_str(text);
				return;
			}
		}
		let node = self.add(Data::Text(text.to_owned()));
		self.insert(parent, node, None);
	}

	fn serialize(&self, node: usize, out: &mut String) {
		let raw = matches!(self.tag(node), Some("script" | "style"));
		let mut after_text = false;
		for &child in &self.nodes[node].children {
			let current = &self.nodes[child].data;
			match current {
				Data::Container => self.serialize(child, out),
				Data::Text(text) if text.is_empty() => continue,
				Data::Text(text) if raw => out.push_str(text),
				Data::Text(text) => {
					// Keeps adjacent text nodes apart when the markup is parsed again.
					if after_text {
						out.push_str("<!---->");
					}
					escape(text, false, out);
				}
				Data::Comment(data) => {
					out.push_str("<!--");
					out.push_str(data);
					out.push_str("-->");
				}
				Data::Element { tag, attributes } => {
					out.push('<');
					out.push_str(tag);
					for (name, value) in attributes {
						out.push(' ');
						out.push_str(name);
						out.push_str("=\"");
						escape(value, true, out);
						out.push('"');
					}
					out.push('>');
					if !is_void(tag) {
						self.serialize(child, out);
						let _ = write!(out, "</{}>", tag);
					}
				}
			}
			after_text = matches!(current, Data::Text(_));
		}
	}
}

fn escape(text: &str, attribute: bool, out: &mut String) {
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' if !attribute => out.push_str("&lt;"),
			'>' if !attribute => out.push_str("&gt;"),
			'"' if attribute => out.push_str("&quot;"),
			c => out.push(c),
		}
	}
}

const VOID_ELEMENTS: &[&str] = &[
	"area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

fn is_void(tag: &str) -> bool {
	VOID_ELEMENTS.contains(&tag)
}

fn valid_tag(tag: &str) -> bool {
	tag.starts_with(|c: char| c.is_ascii_alphabetic())
		&& tag.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '_' | '.'))
}

/// A headless document.
///
/// Clones share the same document.
#[derive(Clone)]
pub struct MemoryHost {
	document: Rc<RefCell<Document>>,
}
impl Default for MemoryHost {
	fn default() -> Self {
		Self::new()
	}
}
impl MemoryHost {
	/// A document with an empty root container.
	#[must_use]
	pub fn new() -> Self {
		let mut document = Document::default();
		document.add(Data::Container);
		Self {
			document: Rc::new(RefCell::new(document)),
		}
	}

	/// The document's root container.
	#[must_use]
	pub fn root(&self) -> MemoryNode {
		MemoryNode(0)
	}

	/// Removes and returns all mutations recorded so far.
	pub fn take_mutations(&self) -> Vec<Mutation> {
		core::mem::take(&mut self.document.borrow_mut().mutations)
	}

	pub fn clear_mutations(&self) {
		self.document.borrow_mut().mutations.clear();
	}

	/// The number of event names currently listened to, across all nodes.
	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.document.borrow().listeners.iter().map(|listener| listener.names.len()).sum()
	}

	/// Dispatches an event named `name` to the listeners on `target`.
	///
	/// Returns how many listeners were invoked.
	pub fn dispatch(&self, target: MemoryNode, name: &str, event: &dyn Any) -> usize {
		let dispatches: Vec<Dispatch> = self
			.document
			.borrow()
			.listeners
			.iter()
			.filter(|listener| listener.target == target.0 && listener.names.iter().any(|n| n == name))
			.map(|listener| Rc::clone(&listener.dispatch))
			.collect();
		for dispatch in &dispatches {
			dispatch(name, event);
		}
		dispatches.len()
	}

	#[must_use]
	pub fn children(&self, parent: MemoryNode) -> Vec<MemoryNode> {
		self.document.borrow().nodes[parent.0].children.iter().copied().map(MemoryNode).collect()
	}

	/// The first element below `root` with the given tag, in document order.
	#[must_use]
	pub fn find_element(&self, root: MemoryNode, tag: &str) -> Option<MemoryNode> {
		let document = self.document.borrow();
		let mut stack: Vec<usize> = document.nodes[root.0].children.iter().rev().copied().collect();
		while let Some(node) = stack.pop() {
			if document.tag(node) == Some(tag) {
				return Some(MemoryNode(node));
			}
			stack.extend(document.nodes[node].children.iter().rev());
		}
		None
	}

	/// Replaces the children of `parent` with nodes parsed from `markup`, without recording mutations.
	///
	/// # Errors
	///
	/// [`Error::Host`] on unterminated comments or tags.
	pub fn set_inner_markup(&self, parent: MemoryNode, markup: &str) -> Result<(), Error> {
		let mut document = self.document.borrow_mut();
		for child in core::mem::take(&mut document.nodes[parent.0].children) {
			document.nodes[child].parent = None;
		}
		parse(&mut document, parent.0, markup)
	}

	/// Serializes the children of `node`.
	#[must_use]
	pub fn to_markup(&self, node: MemoryNode) -> String {
		let mut markup = String::new();
		self.document.borrow().serialize(node.0, &mut markup);
		markup
	}

	fn record(&self, mutation: Mutation) {
		self.document.borrow_mut().mutations.push(mutation);
	}
}

impl Host for MemoryHost {
	type Node = MemoryNode;

	fn create_element(&self, tag: &str) -> Result<MemoryNode, Error> {
		if !valid_tag(tag) {
			return Err(Error::Host(format!("invalid tag name {:?}", tag)));
		}
		let node = MemoryNode(self.document.borrow_mut().add(Data::Element {
			tag: tag.to_owned(),
			attributes: Vec::new(),
		}));
		self.record(Mutation::CreateElement { node, tag: tag.to_owned() });
		Ok(node)
	}

	fn create_text(&self, data: &str) -> MemoryNode {
		let node = MemoryNode(self.document.borrow_mut().add(Data::Text(data.to_owned())));
		self.record(Mutation::CreateText { node, data: data.to_owned() });
		node
	}

	fn create_comment(&self, data: &str) -> MemoryNode {
		let node = MemoryNode(self.document.borrow_mut().add(Data::Comment(data.to_owned())));
		self.record(Mutation::CreateComment { node, data: data.to_owned() });
		node
	}

	fn set_attribute(&self, element: &MemoryNode, name: &str, value: &str) {
		let mut document = self.document.borrow_mut();
		match &mut document.nodes[element.0].data {
			Data::Element { attributes, .. } => match attributes.iter_mut().find(|(n, _)| n == name) {
				Some((_, existing)) => *existing = value.to_owned(),
				None => attributes.push((name.to_owned(), value.to_owned())),
			},
			_ => return error!("Tried to set attribute {} on a non-element.", name),
		}
		document.mutations.push(Mutation::SetAttribute {
			element: *element,
			name: name.to_owned(),
			value: value.to_owned(),
		});
	}

	fn remove_attribute(&self, element: &MemoryNode, name: &str) {
		let mut document = self.document.borrow_mut();
		match &mut document.nodes[element.0].data {
			Data::Element { attributes, .. } => attributes.retain(|(n, _)| n != name),
			_ => return error!("Tried to remove attribute {} from a non-element.", name),
		}
		document.mutations.push(Mutation::RemoveAttribute {
			element: *element,
			name: name.to_owned(),
		});
	}

	fn set_text(&self, node: &MemoryNode, data: &str) {
		let mut document = self.document.borrow_mut();
		match &mut document.nodes[node.0].data {
			Data::Text(text) | Data::Comment(text) => *text = data.to_owned(),
			_ => return error!("Tried to set the text of an element or container."),
		}
		document.mutations.push(Mutation::SetText {
			node: *node,
			data: data.to_owned(),
		});
	}

	fn insert_before(&self, parent: &MemoryNode, node: &MemoryNode, anchor: Option<&MemoryNode>) {
		let mut document = self.document.borrow_mut();
		document.insert(parent.0, node.0, anchor.map(|anchor| anchor.0));
		document.mutations.push(Mutation::Insert {
			parent: *parent,
			node: *node,
			anchor: anchor.copied(),
		});
	}

	fn remove_child(&self, parent: &MemoryNode, node: &MemoryNode) {
		let mut document = self.document.borrow_mut();
		if document.nodes[node.0].parent != Some(parent.0) {
			return error!("Tried to remove a node from a parent it isn't a child of.");
		}
		document.detach(node.0);
		document.mutations.push(Mutation::Remove {
			parent: *parent,
			node: *node,
		});
	}

	fn is_attached(&self, node: &MemoryNode) -> bool {
		self.document.borrow().nodes[node.0].parent.is_some()
	}

	fn parent(&self, node: &MemoryNode) -> Option<MemoryNode> {
		self.document.borrow().nodes[node.0].parent.map(MemoryNode)
	}

	fn first_child(&self, node: &MemoryNode) -> Option<MemoryNode> {
		self.document.borrow().nodes[node.0].children.first().copied().map(MemoryNode)
	}

	fn next_sibling(&self, node: &MemoryNode) -> Option<MemoryNode> {
		let document = self.document.borrow();
		let siblings = &document.nodes[document.nodes[node.0].parent?].children;
		let index = siblings.iter().position(|sibling| *sibling == node.0)?;
		siblings.get(index + 1).copied().map(MemoryNode)
	}

	fn inspect(&self, node: &MemoryNode) -> NodeKind {
		match &self.document.borrow().nodes[node.0].data {
			Data::Element { tag, .. } => NodeKind::Element(tag.clone()),
			Data::Text(data) => NodeKind::Text(data.clone()),
			Data::Comment(data) => NodeKind::Comment(data.clone()),
			Data::Container => NodeKind::Other,
		}
	}

	fn attributes(&self, element: &MemoryNode) -> Vec<(String, String)> {
		match &self.document.borrow().nodes[element.0].data {
			Data::Element { attributes, .. } => attributes.clone(),
			_ => Vec::new(),
		}
	}

	fn bind_events(&self, target: &MemoryNode, names: &[Cow<'static, str>], dispatch: Dispatch) -> ListenerCleanup {
		let id = {
			let mut document = self.document.borrow_mut();
			let id = document.next_listener;
			document.next_listener += 1;
			document.listeners.push(Listener {
				id,
				target: target.0,
				names: names.to_vec(),
				dispatch,
			});
			id
		};
		let document: Weak<RefCell<Document>> = Rc::downgrade(&self.document);
		ListenerCleanup::new(move || {
			if let Some(document) = document.upgrade() {
				document.borrow_mut().listeners.retain(|listener| listener.id != id);
			}
		})
	}

	fn parse_markup(&self, markup: &str) -> Result<MemoryNode, Error> {
		let mut document = self.document.borrow_mut();
		let container = document.add(Data::Container);
		parse(&mut document, container, markup)?;
		Ok(MemoryNode(container))
	}
}

/// A forgiving HTML subset parser: elements, attributes, text, comments, void and raw text elements.
fn parse(document: &mut Document, parent: usize, markup: &str) -> Result<(), Error> {
	let mut stack = vec![parent];
	let mut rest = markup;
	while !rest.is_empty() {
		let top = *stack.last().unwrap_or(&parent);
		if let Some(body) = rest.strip_prefix("<!--") {
			let end = body.find("-->").ok_or_else(|| Error::Host("unterminated comment".to_owned()))?;
			let comment = document.add(Data::Comment(body[..end].to_owned()));
			document.insert(top, comment, None);
			rest = &body[end + 3..];
		} else if rest.starts_with("<!") || rest.starts_with("<?") {
			let end = rest.find('>').ok_or_else(|| Error::Host("unterminated declaration".to_owned()))?;
			rest = &rest[end + 1..];
		} else if let Some(body) = rest.strip_prefix("</") {
			let end = body.find('>').ok_or_else(|| Error::Host("unterminated end tag".to_owned()))?;
			let tag = body[..end].trim().to_ascii_lowercase();
			match stack.iter().skip(1).rposition(|open| document.tag(*open) == Some(tag.as_str())) {
				Some(index) => stack.truncate(index + 1),
				None => warn!("Ignoring unmatched end tag </{}>.", tag),
			}
			rest = &body[end + 1..];
		} else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
			let (tag, attributes, self_closing, after) = parse_start_tag(&rest[1..])?;
			let element = document.add(Data::Element {
				tag: tag.clone(),
				attributes,
			});
			document.insert(top, element, None);
			rest = after;
			if self_closing || is_void(&tag) {
				continue;
			}
			if tag == "script" || tag == "style" {
				let close = format!("</{}", tag);
				let end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
				document.append_text(element, &rest[..end]);
				rest = &rest[end..];
				rest = match rest.find('>') {
					Some(index) => &rest[index + 1..],
					None => "",
				};
			} else {
				stack.push(element);
			}
		} else {
			let end = match rest.strip_prefix('<') {
				Some(after) => after.find('<').map_or(rest.len(), |index| index + 1),
				None => rest.find('<').unwrap_or(rest.len()),
			};
			document.append_text(top, &decode_entities(&rest[..end]));
			rest = &rest[end..];
		}
	}
	Ok(())
}

type StartTag<'a> = (String, Vec<(String, String)>, bool, &'a str);

/// Parses a start tag after its `<`, returning the tag, attributes, whether it closed itself, and what follows.
fn parse_start_tag(input: &str) -> Result<StartTag<'_>, Error> {
	let unterminated = || Error::Host("unterminated start tag".to_owned());
	let name_end = input
		.find(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
		.ok_or_else(unterminated)?;
	let tag = input[..name_end].to_ascii_lowercase();
	let mut attributes: Vec<(String, String)> = Vec::new();
	let mut rest = &input[name_end..];
	loop {
		rest = rest.trim_start();
		if let Some(after) = rest.strip_prefix("/>") {
			return Ok((tag, attributes, true, after));
		} else if let Some(after) = rest.strip_prefix('>') {
			return Ok((tag, attributes, false, after));
		} else if let Some(after) = rest.strip_prefix('/') {
			rest = after;
			continue;
		} else if rest.is_empty() {
			return Err(unterminated());
		}

		let name_end = rest
			.find(|c: char| c.is_ascii_whitespace() || matches!(c, '=' | '>' | '/'))
			.ok_or_else(unterminated)?;
		let name = rest[..name_end].to_ascii_lowercase();
		rest = rest[name_end..].trim_start();
		let value = match rest.strip_prefix('=') {
			Some(after) => {
				let after = after.trim_start();
				let (raw, remaining) = match after.chars().next() {
					Some(quote @ ('"' | '\'')) => {
						let end = after[1..].find(quote).ok_or_else(unterminated)?;
						(&after[1..=end], &after[end + 2..])
					}
					_ => {
						let end = after.find(|c: char| c.is_ascii_whitespace() || c == '>').ok_or_else(unterminated)?;
						(&after[..end], &after[end..])
					}
				};
				rest = remaining;
				decode_entities(raw).into_owned()
			}
			None => String::new(),
		};
		if !attributes.iter().any(|(n, _)| *n == name) {
			attributes.push((name, value));
		}
	}
}

fn decode_entities(raw: &str) -> Cow<'_, str> {
	if !raw.contains('&') {
		return Cow::Borrowed(raw);
	}
	let mut decoded = String::with_capacity(raw.len());
	let mut rest = raw;
	while let Some(index) = rest.find('&') {
		decoded.push_str(&rest[..index]);
		rest = &rest[index..];
		let entity = rest
			.find(';')
			.filter(|end| *end <= 10)
			.and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
		match entity {
			Some((c, end)) => {
				decoded.push(c);
				rest = &rest[end + 1..];
			}
			None => {
				decoded.push('&');
				rest = &rest[1..];
			}
		}
	}
	decoded.push_str(rest);
	Cow::Owned(decoded)
}

fn decode_entity(name: &str) -> Option<char> {
	match name {
		"amp" => Some('&'),
		"lt" => Some('<'),
		"gt" => Some('>'),
		"quot" => Some('"'),
		"apos" => Some('\''),
		"nbsp" => Some('\u{a0}'),
		_ => {
			let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
				u32::from_str_radix(hex, 16).ok()?
			} else {
				name.strip_prefix('#')?.parse().ok()?
			};
			char::from_u32(code)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn markup_round_trip() {
		let host = MemoryHost::new();
		let markup = r#"<div id="a" class="x y"><p>Hello &amp; welcome</p><br><!--vroot--><input disabled=""></div>"#;
		host.set_inner_markup(host.root(), markup).unwrap();
		assert_eq!(host.to_markup(host.root()), markup);
		assert!(host.take_mutations().is_empty());
	}

	#[test]
	fn raw_text_and_entities() {
		let host = MemoryHost::new();
		host.set_inner_markup(
			host.root(),
			r#"<script type="application/json">{"a":"<b>"}</script><span title='&quot;q&quot;'>&#65;&#x42;&unknown;</span>"#,
		)
		.unwrap();
		let children = host.children(host.root());
		assert_eq!(children.len(), 2);
		assert_eq!(host.inspect(&host.first_child(&children[0]).unwrap()), NodeKind::Text(r#"{"a":"<b>"}"#.to_owned()));
		assert_eq!(host.attributes(&children[1]), vec![("title".to_owned(), "\"q\"".to_owned())]);
		assert_eq!(host.inspect(&host.first_child(&children[1]).unwrap()), NodeKind::Text("AB&unknown;".to_owned()));
	}

	#[test]
	fn unmatched_end_tags_are_ignored() {
		let host = MemoryHost::new();
		host.set_inner_markup(host.root(), "<ul><li>a</li></p><li>b</ul>c").unwrap();
		assert_eq!(host.to_markup(host.root()), "<ul><li>a</li><li>b</li></ul>c");
	}

	#[test]
	fn adjacent_text_stays_apart() {
		let host = MemoryHost::new();
		let root = host.root();
		for data in ["a", "", "b"] {
			let text = host.create_text(data);
			host.insert_before(&root, &text, None);
		}
		let markup = host.to_markup(root);
		assert_eq!(markup, "a<!---->b");

		let copy = MemoryHost::new();
		copy.set_inner_markup(copy.root(), &markup).unwrap();
		let children = copy.children(copy.root());
		assert_eq!(children.len(), 3);
		assert_eq!(copy.inspect(&children[2]), NodeKind::Text("b".to_owned()));
	}

	#[test]
	fn unterminated_comment() {
		let host = MemoryHost::new();
		assert!(matches!(host.parse_markup("<!-- oops"), Err(Error::Host(_))));
	}

	#[test]
	fn mutations_and_siblings() {
		let host = MemoryHost::new();
		let root = host.root();
		let a = host.create_element("a").unwrap();
		let b = host.create_text("b");
		host.append_child(&root, &b);
		host.insert_before(&root, &a, Some(&b));
		assert_eq!(host.first_child(&root), Some(a));
		assert_eq!(host.next_sibling(&a), Some(b));
		assert_eq!(host.next_sibling(&b), None);
		host.remove_child(&root, &a);
		assert!(!host.is_attached(&a));
		assert_eq!(
			host.take_mutations(),
			vec![
				Mutation::CreateElement { node: a, tag: "a".to_owned() },
				Mutation::CreateText { node: b, data: "b".to_owned() },
				Mutation::Insert { parent: root, node: b, anchor: None },
				Mutation::Insert { parent: root, node: a, anchor: Some(b) },
				Mutation::Remove { parent: root, node: a },
			]
		);
	}

	#[test]
	fn invalid_tag() {
		assert!(matches!(MemoryHost::new().create_element("no tag"), Err(Error::Host(_))));
	}

	#[test]
	fn listeners_are_released() {
		let host = MemoryHost::new();
		let node = host.create_element("button").unwrap();
		let dispatch: Dispatch = Rc::new(|_: &str, _: &dyn Any| ());
		let cleanup = host.bind_events(&node, &[Cow::Borrowed("click"), Cow::Borrowed("input")], dispatch);
		assert_eq!(host.listener_count(), 2);
		assert_eq!(host.dispatch(node, "click", &()), 1);
		assert_eq!(host.dispatch(node, "keydown", &()), 0);
		cleanup.release();
		assert_eq!(host.listener_count(), 0);
	}
}
