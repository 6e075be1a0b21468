//! Loads existing host nodes back into virtual nodes, and the component modules marked regions refer to.

use crate::{
	component::ComponentType,
	element::{AttrValue, FrameProps, FrameStatus},
	error::Error,
	host::{Host, NodeKind},
	hydrate::{find_close, is_payload, read_payload, FrameDescriptor, Marker},
	vnode::{ComponentNode, FrameNode, HostNode, VNode},
};
use futures::future::{join_all, LocalBoxFuture};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, rc::Rc};
use tracing::{debug, trace_span};

/// Resolves an exported component of a module.
pub trait ModuleLoader {
	fn load(&self, module_url: &str, export_name: &str) -> LocalBoxFuture<'static, Result<ComponentType, Error>>;
}

/// The serialized payload of a virtual root.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualRootInfo {
	pub module_url: String,
	pub export_name: String,
	#[serde(default)]
	pub props: serde_json::Value,
}

/// Loaded components by module URL and export name.
#[derive(Default)]
pub(crate) struct Modules(HashMap<(String, String), ComponentType>);
impl Modules {
	pub(crate) fn get(&self, module_url: &str, export_name: &str) -> Result<&ComponentType, Error> {
		self.0
			.get(&(module_url.to_owned(), export_name.to_owned()))
			.ok_or_else(|| Error::invariant(format!("module {} `{}` was not loaded", module_url, export_name)))
	}
}

/// Loads each distinct module in `specs` concurrently.
///
/// # Errors
///
/// [`Error::Load`] if any load fails, or if there is something to load but no loader.
pub(crate) async fn load_modules(loader: Option<Rc<dyn ModuleLoader>>, mut specs: Vec<(String, String)>) -> Result<Modules, Error> {
	specs.sort();
	specs.dedup();
	if specs.is_empty() {
		return Ok(Modules::default());
	}
	let loader = loader.ok_or_else(|| Error::Load {
		url: specs[0].0.clone(),
		export: specs[0].1.clone(),
		message: "no module loader configured".to_owned(),
	})?;

	debug!("Loading {} module export(s).", specs.len());
	let loaded = join_all(specs.iter().map(|(url, export)| loader.load(url, export))).await;
	let mut modules = HashMap::with_capacity(specs.len());
	for (spec, component) in specs.into_iter().zip(loaded) {
		modules.insert(spec, component?);
	}
	Ok(Modules(modules))
}

/// The module exports referenced by virtual-root payloads among the siblings from `first` up to `end`, at any depth.
pub(crate) fn module_specs_between<H: Host>(host: &H, first: Option<H::Node>, end: Option<&H::Node>) -> Result<Vec<(String, String)>, Error> {
	let mut specs = Vec::new();
	collect_specs(host, first, end, &mut specs)?;
	Ok(specs)
}

fn collect_specs<H: Host>(host: &H, first: Option<H::Node>, end: Option<&H::Node>, out: &mut Vec<(String, String)>) -> Result<(), Error> {
	let mut next = first;
	while let Some(node) = next {
		if Some(&node) == end {
			break;
		}
		if let Some(Marker::RootStart(_)) = Marker::of(host, &node) {
			if let Some(info) = read_payload::<H, VirtualRootInfo>(host, &node)? {
				out.push((info.module_url, info.export_name));
			}
		} else if let NodeKind::Element(_) = host.inspect(&node) {
			collect_specs(host, host.first_child(&node), None, out)?;
		}
		next = host.next_sibling(&node);
	}
	Ok(())
}

/// Loads the siblings from `first` up to, but excluding, `end`.
///
/// Marked virtual roots become component invocations and marked frames become frames.
/// Other comments and payload scripts are skipped.
///
/// # Errors
///
/// [`Error::InvariantViolation`] on unmatched markers or virtual roots without payload,
/// and [`Error::Payload`] on malformed payloads.
pub(crate) fn load_region<H: Host>(host: &H, first: Option<H::Node>, end: Option<&H::Node>, modules: &Modules) -> Result<Vec<VNode>, Error> {
	let mut nodes = Vec::new();
	let mut next = first;
	while let Some(node) = next {
		if Some(&node) == end {
			break;
		}
		next = host.next_sibling(&node);
		match host.inspect(&node) {
			NodeKind::Text(data) => nodes.push(VNode::text(data)),
			NodeKind::Element(_) if is_payload(host, &node) => (),
			NodeKind::Element(tag) => nodes.push(load_element(host, &node, tag, modules)?),
			NodeKind::Comment(data) => match Marker::parse(&data) {
				Some(Marker::RootStart(_)) => {
					let close = find_close(host, &node)?;
					let info = read_payload::<H, VirtualRootInfo>(host, &node)?
						.ok_or_else(|| Error::invariant("virtual root without payload in loaded markup"))?;
					nodes.push(VNode::Component(ComponentNode {
						ty: modules.get(&info.module_url, &info.export_name)?.clone(),
						key: None,
						props: info.props,
						children: Vec::new(),
					}));
					next = host.next_sibling(&close);
				}
				Some(Marker::FrameStart) => {
					let (frame, close) = load_frame(host, &node, modules)?;
					nodes.push(frame);
					next = host.next_sibling(&close);
				}
				Some(marker) => return Err(Error::invariant(format!("{:?} marker without a matching start marker", marker))),
				None => (),
			},
			NodeKind::Other => (),
		}
	}
	Ok(nodes)
}

fn load_element<H: Host>(host: &H, element: &H::Node, tag: String, modules: &Modules) -> Result<VNode, Error> {
	let span = trace_span!("Loading element", %tag);
	let _enter = span.enter();
	Ok(VNode::Host(HostNode {
		tag: Cow::Owned(tag.to_ascii_lowercase()),
		key: None,
		attributes: host
			.attributes(element)
			.into_iter()
			.map(|(name, value)| (Cow::Owned(name), AttrValue::Str(value)))
			.collect(),
		style: None,
		events: Vec::new(),
		children: load_region(host, host.first_child(element), None, modules)?,
	}))
}

/// Loads the frame starting at the marker `start`, returning it and its end marker.
///
/// A pending frame loads without children.
pub(crate) fn load_frame<H: Host>(host: &H, start: &H::Node, modules: &Modules) -> Result<(VNode, H::Node), Error> {
	let close = find_close(host, start)?;
	let FrameDescriptor { src, id, status } =
		read_payload(host, start)?.ok_or_else(|| Error::invariant("frame marker without descriptor"))?;
	let children = match status {
		FrameStatus::Ready => load_region(host, host.next_sibling(start), Some(&close), modules)?,
		FrameStatus::Pending => Vec::new(),
	};
	let frame = VNode::Frame(FrameNode {
		key: None,
		props: FrameProps { id, src, status },
		children,
	});
	Ok((frame, close))
}
