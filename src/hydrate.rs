//! Resumes server-rendered markup.
//!
//! Server markup delimits regions with comment markers:
//!
//! ```text
//! <!--vroot:ID--><script type="application/json">{"moduleUrl":…,"exportName":…,"props":…}</script>…<!--/vroot-->
//! <!--frame--><script type="application/json">{"src":…,"id":…,"status":"ready"|"pending"}</script>…<!--/frame-->
//! ```
//!
//! A virtual root's payload may be omitted if its info was [registered](`Hydrator::register`) under its ID instead.
//! Content for a pending frame may arrive later in an element carrying `data-frame-content="ID"`.
//!
//! Hydration claims existing host nodes one by one through a [`Cursor`]. Anything that doesn't match is logged,
//! discarded and replaced by a freshly inserted node.

use crate::{
	element::FrameStatus,
	env::Env,
	error::Error,
	frame::FrameContext,
	host::{Host, NodeKind},
	load::{load_frame, load_modules, module_specs_between, Modules, VirtualRootInfo},
	mounted::{Mounted, Owner},
	reconcile::{insert, Cx},
	scheduler::Scheduler,
	vnode::{ComponentNode, VNode},
};
use core::cell::{Cell, RefCell};
use hashbrown::HashMap;
use serde::{de::DeserializeOwned, Deserialize};
use std::rc::{Rc, Weak};
use tracing::{debug, error, trace, trace_span, warn, Instrument};

pub const VIRTUAL_ROOT_START: &str = "vroot";
pub const VIRTUAL_ROOT_END: &str = "/vroot";
pub const FRAME_START: &str = "frame";
pub const FRAME_END: &str = "/frame";
pub const FRAME_CONTENT_ATTRIBUTE: &str = "data-frame-content";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
	pub virtual_roots: usize,
	pub frames: usize,
	/// Host nodes or attributes that didn't match and were repaired.
	pub mismatches: usize,
}

/// The serialized descriptor following a frame's start marker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameDescriptor {
	#[serde(default)]
	pub src: Option<String>,
	pub id: String,
	#[serde(default)]
	pub status: FrameStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Marker {
	RootStart(Option<String>),
	RootEnd,
	FrameStart,
	FrameEnd,
}
impl Marker {
	pub(crate) fn parse(data: &str) -> Option<Self> {
		match data.trim() {
			VIRTUAL_ROOT_START => Some(Self::RootStart(None)),
			VIRTUAL_ROOT_END => Some(Self::RootEnd),
			FRAME_START => Some(Self::FrameStart),
			FRAME_END => Some(Self::FrameEnd),
			other => other
				.strip_prefix(VIRTUAL_ROOT_START)
				.and_then(|rest| rest.strip_prefix(':'))
				.map(|id| Self::RootStart(Some(id.to_owned()))),
		}
	}

	pub(crate) fn of<H: Host>(host: &H, node: &H::Node) -> Option<Self> {
		match host.inspect(node) {
			NodeKind::Comment(data) => Self::parse(&data),
			_ => None,
		}
	}

	fn is_start(&self) -> bool {
		matches!(self, Self::RootStart(_) | Self::FrameStart)
	}

	fn same_family(&self, other: &Self) -> bool {
		matches!(
			(self, other),
			(Self::RootStart(_) | Self::RootEnd, Self::RootStart(_) | Self::RootEnd) | (Self::FrameStart | Self::FrameEnd, Self::FrameStart | Self::FrameEnd)
		)
	}
}

/// Finds the end marker matching the start marker `start`, skipping nested pairs of the same kind.
///
/// # Errors
///
/// [`Error::InvariantViolation`] if `start` isn't a start marker or has no matching end marker.
pub(crate) fn find_close<H: Host>(host: &H, start: &H::Node) -> Result<H::Node, Error> {
	let opening = Marker::of(host, start)
		.filter(Marker::is_start)
		.ok_or_else(|| Error::invariant("expected a start marker"))?;
	let mut depth = 1_usize;
	let mut next = host.next_sibling(start);
	while let Some(node) = next {
		if let Some(marker) = Marker::of(host, &node).filter(|marker| marker.same_family(&opening)) {
			if marker.is_start() {
				depth += 1;
			} else {
				depth -= 1;
				if depth == 0 {
					return Ok(node);
				}
			}
		}
		next = host.next_sibling(&node);
	}
	Err(Error::invariant(format!("unmatched hydration marker {:?}", opening)))
}

/// Whether `node` is a `<script type="application/json">` payload.
pub(crate) fn is_payload<H: Host>(host: &H, node: &H::Node) -> bool {
	match host.inspect(node) {
		NodeKind::Element(tag) if tag.eq_ignore_ascii_case("script") => host
			.attributes(node)
			.iter()
			.any(|(name, value)| name == "type" && value == "application/json"),
		_ => false,
	}
}

fn text_content<H: Host>(host: &H, node: &H::Node) -> String {
	let mut text = String::new();
	let mut next = host.first_child(node);
	while let Some(child) = next {
		if let NodeKind::Text(data) = host.inspect(&child) {
			text.push_str(&data);
		}
		next = host.next_sibling(&child);
	}
	text
}

/// Parses the payload directly following `marker`, ignoring whitespace in between.
///
/// # Errors
///
/// [`Error::Payload`] if there is a payload but it doesn't deserialize into `T`.
pub(crate) fn read_payload<H: Host, T: DeserializeOwned>(host: &H, marker: &H::Node) -> Result<Option<T>, Error> {
	let mut next = host.next_sibling(marker);
	while let Some(node) = next {
		match host.inspect(&node) {
			NodeKind::Text(data) if data.trim().is_empty() => next = host.next_sibling(&node),
			_ if is_payload(host, &node) => return Ok(Some(serde_json::from_str(&text_content(host, &node))?)),
			_ => break,
		}
	}
	Ok(None)
}

/// Hands out existing host nodes between two bounds, in order, for hydration to claim.
///
/// Comments and payload scripts are never claimed.
pub(crate) struct Cursor<H: Host> {
	pub(crate) parent: H::Node,
	next: Option<H::Node>,
	end: Option<H::Node>,
	mismatches: Rc<Cell<usize>>,
}
impl<H: Host> Cursor<H> {
	/// A cursor over the children of `parent` from `next` up to, but excluding, `end`.
	pub(crate) fn new(parent: H::Node, next: Option<H::Node>, end: Option<H::Node>, mismatches: Rc<Cell<usize>>) -> Self {
		Self {
			parent,
			next,
			end,
			mismatches,
		}
	}

	/// A cursor over all children of `parent`, sharing this cursor's mismatch count.
	pub(crate) fn nested(&self, host: &H, parent: &H::Node) -> Self {
		Self::new(parent.clone(), host.first_child(parent), None, Rc::clone(&self.mismatches))
	}

	pub(crate) fn mismatches(&self) -> Rc<Cell<usize>> {
		Rc::clone(&self.mismatches)
	}

	pub(crate) fn count_mismatches(&self, count: usize) {
		self.mismatches.set(self.mismatches.get() + count);
	}

	/// Where freshly created nodes go so they end up in claim order.
	pub(crate) fn anchor(&self) -> Option<H::Node> {
		self.next.clone()
	}

	fn at_end(&self) -> bool {
		self.next.is_none() || self.next == self.end
	}

	fn advance(&mut self, host: &H) {
		if let Some(next) = &self.next {
			self.next = host.next_sibling(next);
		}
	}

	/// Comments and payloads, except frame markers, which only a frame may claim.
	fn ignorable(host: &H, node: &H::Node) -> bool {
		match host.inspect(node) {
			NodeKind::Comment(data) => Marker::parse(&data) != Some(Marker::FrameStart),
			_ => is_payload(host, node),
		}
	}

	/// The next claimable node, if any.
	fn peek(&mut self, host: &H) -> Option<H::Node> {
		while !self.at_end() {
			let next = self.next.clone()?;
			if Self::ignorable(host, &next) {
				self.advance(host);
			} else {
				return Some(next);
			}
		}
		None
	}

	/// Removes the next claimable node from the host.
	fn discard(&mut self, host: &H, node: &H::Node) {
		self.advance(host);
		host.remove_child(&self.parent, node);
		self.count_mismatches(1);
	}

	/// Claims a text node for the non-empty `value`.
	///
	/// Adjacent server text without a `<!---->` separator arrives merged into one node, which is split here.
	pub(crate) fn claim_text(&mut self, host: &H, value: &str) -> Option<H::Node> {
		let node = match self.peek(host) {
			Some(node) => node,
			None => {
				warn!("Expected text beyond the end of the server markup. Inserting it.");
				self.count_mismatches(1);
				return None;
			}
		};
		match host.inspect(&node) {
			NodeKind::Comment(_) => {
				warn!("Expected text but found a frame. Inserting it before.");
				self.count_mismatches(1);
				None
			}
			NodeKind::Text(data) if data.len() > value.len() && data.starts_with(value) => {
				trace!("Splitting merged server text.");
				host.set_text(&node, value);
				let rest = host.create_text(&data[value.len()..]);
				host.insert_before(&self.parent, &rest, host.next_sibling(&node).as_ref());
				self.next = Some(rest);
				Some(node)
			}
			NodeKind::Text(data) => {
				self.advance(host);
				if data != value {
					if cfg!(feature = "dangerous-logging") {
						warn!("Unexpected text data: Expected {:?} but found {:?}. Overwriting.", value, data);
					} else {
						warn!("Unexpected text data. Overwriting.");
					}
					host.set_text(&node, value);
					self.count_mismatches(1);
				}
				Some(node)
			}
			found => {
				error!("Expected a text node but found {}. Replacing it.", describe(&found));
				self.discard(host, &node);
				None
			}
		}
	}

	pub(crate) fn claim_element(&mut self, host: &H, tag: &str) -> Option<H::Node> {
		let node = match self.peek(host) {
			Some(node) => node,
			None => {
				warn!("Expected <{}> beyond the end of the server markup. Inserting it.", tag);
				self.count_mismatches(1);
				return None;
			}
		};
		match host.inspect(&node) {
			NodeKind::Element(found) if found.eq_ignore_ascii_case(tag) => {
				self.advance(host);
				Some(node)
			}
			NodeKind::Comment(_) => {
				warn!("Expected <{}> but found a frame. Inserting it before.", tag);
				self.count_mismatches(1);
				None
			}
			found => {
				error!("Expected <{}> but found {}. Replacing it.", tag, describe(&found));
				self.discard(host, &node);
				None
			}
		}
	}

	/// Claims the marker pair of the frame `id`, returning its start and end marker.
	pub(crate) fn claim_frame(&mut self, host: &H, id: &str) -> Option<(H::Node, H::Node)> {
		while !self.at_end() {
			let next = self.next.clone()?;
			match Marker::of(host, &next) {
				Some(Marker::FrameStart) => {
					let close = find_close(host, &next).ok()?;
					let descriptor = read_payload::<H, FrameDescriptor>(host, &next).ok().flatten();
					if descriptor.as_ref().map(|descriptor| descriptor.id.as_str()) != Some(id) {
						warn!("Expected the markers of frame {:?}, but found another frame. Inserting it.", id);
						self.count_mismatches(1);
						return None;
					}
					self.next = host.next_sibling(&close);
					return Some((next, close));
				}
				_ if Self::ignorable(host, &next) => self.advance(host),
				_ => break,
			}
		}
		warn!("Expected the markers of frame {:?}. Inserting it.", id);
		self.count_mismatches(1);
		None
	}

	/// Removes all unclaimed, claimable nodes that are left.
	pub(crate) fn finish(&mut self, host: &H) {
		let span = trace_span!("Removing unclaimed server nodes");
		let _enter = span.enter();
		while let Some(node) = self.peek(host) {
			if Marker::of(host, &node) == Some(Marker::FrameStart) {
				warn!("Unexpected frame at the end of the server markup. Removing it.");
				if let Ok(close) = find_close(host, &node) {
					let after = host.next_sibling(&close);
					let mut next = Some(node);
					while let Some(stray) = next {
						next = if stray == close { None } else { host.next_sibling(&stray) };
						host.remove_child(&self.parent, &stray);
					}
					self.next = after;
					self.count_mismatches(1);
				} else {
					self.discard(host, &node);
				}
				continue;
			}
			warn!("Unexpected {} at the end of the server markup. Removing it.", describe(&host.inspect(&node)));
			self.discard(host, &node);
		}
	}
}

fn describe(kind: &NodeKind) -> String {
	match kind {
		NodeKind::Element(tag) => format!("<{}>", tag.to_ascii_lowercase()),
		NodeKind::Text(_) => "a text node".to_owned(),
		NodeKind::Comment(_) => "a comment".to_owned(),
		NodeKind::Other => "an unknown node".to_owned(),
	}
}

enum Region<H: Host> {
	VirtualRoot { start: H::Node, close: H::Node, id: Option<String> },
	Frame { start: H::Node, close: H::Node },
	Content { container: H::Node, id: String },
}

enum Resolved<H: Host> {
	VirtualRoot { start: H::Node, close: H::Node, info: VirtualRootInfo },
	Frame { start: H::Node },
}

/// Collects marked regions below `parent` in document order, without descending into them.
fn scan<H: Host>(host: &H, parent: &H::Node, out: &mut Vec<Region<H>>) -> Result<(), Error> {
	let mut next = host.first_child(parent);
	while let Some(node) = next {
		next = host.next_sibling(&node);
		match host.inspect(&node) {
			NodeKind::Comment(data) => match Marker::parse(&data) {
				Some(Marker::RootStart(id)) => {
					let close = find_close(host, &node)?;
					next = host.next_sibling(&close);
					out.push(Region::VirtualRoot { start: node, close, id });
				}
				Some(Marker::FrameStart) => {
					let close = find_close(host, &node)?;
					next = host.next_sibling(&close);
					out.push(Region::Frame { start: node, close });
				}
				Some(marker) => return Err(Error::invariant(format!("{:?} marker without a matching start marker", marker))),
				None => (),
			},
			NodeKind::Element(_) => {
				let content = host.attributes(&node).into_iter().find(|(name, _)| name == FRAME_CONTENT_ATTRIBUTE);
				match content {
					Some((_, id)) => out.push(Region::Content { container: node, id }),
					None => scan(host, &node, out)?,
				}
			}
			NodeKind::Text(_) | NodeKind::Other => (),
		}
	}
	Ok(())
}

/// Hydrates marked regions of server markup and keeps them alive.
pub struct Hydrator<H: Host> {
	env: Rc<Env<H>>,
	scheduler: Rc<Scheduler<H>>,
	pending: RefCell<HashMap<String, VirtualRootInfo>>,
	regions: RefCell<Vec<HydratedRegion<H>>>,
}

/// A hydrated region and the host parent its markers live in.
struct HydratedRegion<H: Host> {
	parent: H::Node,
	content: Mounted<H>,
}

impl<H: Host> Hydrator<H> {
	#[must_use]
	pub fn new(env: &Rc<Env<H>>) -> Self {
		Self {
			env: Rc::clone(env),
			scheduler: Scheduler::new(env),
			pending: RefCell::default(),
			regions: RefCell::default(),
		}
	}

	/// The scheduler of components in hydrated virtual roots.
	#[must_use]
	pub fn scheduler(&self) -> &Rc<Scheduler<H>> {
		&self.scheduler
	}

	/// Registers how to hydrate the virtual root marked `vroot:ID`, for markup that carries no payload.
	pub fn register(&self, id: impl Into<String>, info: VirtualRootInfo) {
		self.pending.borrow_mut().insert(id.into(), info);
	}

	/// Hydrates all virtual roots and frames below `root`.
	///
	/// Suspends only to load the modules the markup refers to.
	///
	/// # Errors
	///
	/// Invariant violations like unmatched markers, and module load failures.
	/// Render errors within a region are reported to the error sink and don't stop other regions from hydrating.
	pub async fn hydrate(&self, root: &H::Node) -> Result<HydrationReport, Error> {
		let span = trace_span!("Hydrating");
		self.hydrate_inner(root).instrument(span).await
	}

	async fn hydrate_inner(&self, root: &H::Node) -> Result<HydrationReport, Error> {
		let host = &self.env.host;
		let mut regions = Vec::new();
		scan(host, root, &mut regions)?;

		let mut specs = Vec::new();
		let mut resolved = Vec::with_capacity(regions.len());
		let mut contents = Vec::new();
		for region in regions {
			match region {
				Region::VirtualRoot { start, close, id } => {
					let registered = id.as_ref().and_then(|id| self.pending.borrow_mut().remove(id));
					let info = match registered {
						Some(info) => info,
						None => match read_payload::<H, VirtualRootInfo>(host, &start)? {
							Some(info) => info,
							None => {
								warn!("Virtual root {:?} has neither a payload nor registered info. Skipping it.", id);
								continue;
							}
						},
					};
					specs.push((info.module_url.clone(), info.export_name.clone()));
					resolved.push(Resolved::VirtualRoot { start, close, info });
				}
				Region::Frame { start, close } => {
					specs.extend(module_specs_between(host, host.next_sibling(&start), Some(&close))?);
					resolved.push(Resolved::Frame { start });
				}
				Region::Content { container, id } => contents.push((container, id)),
			}
		}

		let modules = load_modules(self.env.loader.clone(), specs).await?;

		let mismatches = Rc::new(Cell::new(0));
		let mut report = HydrationReport::default();
		for region in resolved {
			let is_frame = matches!(region, Resolved::Frame { .. });
			match self.apply(region, &modules, &mismatches) {
				Ok(()) if is_frame => report.frames += 1,
				Ok(()) => report.virtual_roots += 1,
				Err(error) if error.is_fatal() => return Err(error),
				Err(error) => self.env.sink.report(&error),
			}
		}

		// Content that was streamed in before hydration got to its frame.
		for (container, id) in contents {
			if let Some(frame) = self.pending_frame(&id) {
				frame.fill(container).await?;
			}
		}

		report.mismatches = mismatches.get();
		debug!(
			"Hydrated {} virtual root(s) and {} frame(s) with {} mismatch(es).",
			report.virtual_roots, report.frames, report.mismatches
		);
		Ok(report)
	}

	fn apply(&self, region: Resolved<H>, modules: &Modules, mismatches: &Rc<Cell<usize>>) -> Result<(), Error> {
		let host = &self.env.host;
		let cx = Cx::new(&self.env, &self.scheduler);
		match region {
			Resolved::VirtualRoot { start, close, info } => {
				let span = trace_span!("Hydrating virtual root", module_url = %info.module_url, export_name = %info.export_name);
				let _enter = span.enter();
				let parent = host.parent(&start).ok_or_else(|| Error::invariant("virtual root marker without parent"))?;
				let vnode = VNode::Component(ComponentNode {
					ty: modules.get(&info.module_url, &info.export_name)?.clone(),
					key: None,
					props: info.props,
					children: Vec::new(),
				});
				let mut cursor = Cursor::new(parent.clone(), host.next_sibling(&start), Some(close.clone()), Rc::clone(mismatches));
				let content = insert(cx, vnode, &parent, Some(&close), &Owner::Root, Some(&mut cursor))?;
				cursor.finish(host);
				self.regions.borrow_mut().push(HydratedRegion { parent, content });
			}
			Resolved::Frame { start } => {
				let span = trace_span!("Hydrating frame");
				let _enter = span.enter();
				let parent = host.parent(&start).ok_or_else(|| Error::invariant("frame marker without parent"))?;
				let (vnode, close) = load_frame(host, &start, modules)?;
				let after = host.next_sibling(&close);
				let mut cursor = Cursor::new(parent.clone(), Some(start), after.clone(), Rc::clone(mismatches));
				let content = insert(cx, vnode, &parent, after.as_ref(), &Owner::Root, Some(&mut cursor))?;
				self.regions.borrow_mut().push(HydratedRegion { parent, content });
			}
		}
		Ok(())
	}

	fn pending_frame(&self, id: &str) -> Option<Rc<FrameContext<H>>> {
		self.env
			.frames
			.borrow()
			.get(id)
			.and_then(Weak::upgrade)
			.filter(|frame| frame.status() == FrameStatus::Pending)
	}

	/// Fulfils the pending frame named by `container`'s `data-frame-content` attribute with `container`'s children.
	///
	/// Returns whether a pending frame took the content. Each pending frame accepts content once.
	///
	/// # Errors
	///
	/// [`Error::InvariantViolation`] if `container` doesn't name a frame, and module load failures.
	pub async fn content_arrived(&self, container: &H::Node) -> Result<bool, Error> {
		let host = &self.env.host;
		let id = host
			.attributes(container)
			.into_iter()
			.find(|(name, _)| name == FRAME_CONTENT_ATTRIBUTE)
			.map(|(_, id)| id)
			.ok_or_else(|| Error::invariant(format!("content container without {} attribute", FRAME_CONTENT_ATTRIBUTE)))?;
		match self.pending_frame(&id) {
			Some(frame) => {
				frame.fill(container.clone()).await?;
				Ok(true)
			}
			None => {
				trace!("No pending frame {:?} for arriving content.", id);
				Ok(false)
			}
		}
	}

	/// Tears down all hydrated regions.
	pub fn unmount(&self) {
		let cx = Cx::new(&self.env, &self.scheduler);
		for HydratedRegion { parent, content } in self.regions.take() {
			content.detach(cx, Some(&parent));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn markers() {
		assert_eq!(Marker::parse("vroot"), Some(Marker::RootStart(None)));
		assert_eq!(Marker::parse(" vroot:main "), Some(Marker::RootStart(Some("main".to_owned()))));
		assert_eq!(Marker::parse("/vroot"), Some(Marker::RootEnd));
		assert_eq!(Marker::parse("frame"), Some(Marker::FrameStart));
		assert_eq!(Marker::parse("/frame"), Some(Marker::FrameEnd));
		assert_eq!(Marker::parse("vrootish"), None);
		assert_eq!(Marker::parse("a comment"), None);
	}

	#[test]
	fn frame_descriptor_defaults() {
		let descriptor: FrameDescriptor = serde_json::from_str(r#"{"id":"news"}"#).unwrap();
		assert_eq!(
			descriptor,
			FrameDescriptor {
				src: None,
				id: "news".to_owned(),
				status: FrameStatus::Ready,
			}
		);
		let pending: FrameDescriptor = serde_json::from_str(r#"{"id":"news","src":"/news","status":"pending"}"#).unwrap();
		assert_eq!(pending.status, FrameStatus::Pending);
	}
}
