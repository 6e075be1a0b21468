//! The Style Bridge: style objects become generated class names whose rules live in a document-wide sheet.

use crate::{element::StyleObject, rc_hash_map::RcHashMap};
use core::{cell::RefCell, fmt::Write as _};
use hashbrown::HashMap;
use std::{collections::BTreeMap, rc::Rc};
use tracing::{error, trace, trace_span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedStyle {
	pub class_name: String,
	pub rule_text: String,
}

pub trait StyleBridge {
	/// Pure: equal style objects always yield equal results.
	fn compute(&self, style: &StyleObject) -> ComputedStyle;
	fn insert(&self, class_name: &str, rule_text: &str);
	fn remove(&self, class_name: &str);
}

/// A [`StyleBridge`] that names classes after a content hash and keeps its rules in memory.
///
/// `on_change` receives the full sheet text whenever a rule is inserted or removed.
#[derive(Default)]
pub struct HashedStyles {
	memo: RefCell<HashMap<StyleObject, ComputedStyle>>,
	rules: RefCell<BTreeMap<String, String>>,
	on_change: Option<Box<dyn Fn(&str)>>,
}
impl HashedStyles {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_sheet_writer(on_change: impl Fn(&str) + 'static) -> Self {
		Self {
			on_change: Some(Box::new(on_change)),
			..Self::default()
		}
	}

	#[must_use]
	pub fn sheet_text(&self) -> String {
		self.rules.borrow().values().map(String::as_str).collect::<Vec<_>>().join("\n")
	}

	#[must_use]
	pub fn rule_count(&self) -> usize {
		self.rules.borrow().len()
	}

	fn changed(&self) {
		if let Some(on_change) = &self.on_change {
			on_change(&self.sheet_text());
		}
	}
}
impl StyleBridge for HashedStyles {
	fn compute(&self, style: &StyleObject) -> ComputedStyle {
		if let Some(computed) = self.memo.borrow().get(style) {
			return computed.clone();
		}

		let mut declarations = String::new();
		for (property, value) in style.declarations() {
			// Writing into a `String` can't fail.
			let _ = write!(declarations, "{}:{};", property, value);
		}
		let class_name = format!("s-{:08x}", fnv1a(declarations.as_bytes()));
		let computed = ComputedStyle {
			rule_text: format!(".{}{{{}}}", class_name, declarations),
			class_name,
		};
		self.memo.borrow_mut().insert(style.clone(), computed.clone());
		computed
	}

	fn insert(&self, class_name: &str, rule_text: &str) {
		self.rules.borrow_mut().insert(class_name.to_owned(), rule_text.to_owned());
		self.changed();
	}

	fn remove(&self, class_name: &str) {
		self.rules.borrow_mut().remove(class_name);
		self.changed();
	}
}

/// Stable across processes, so server-rendered class names match the client's.
fn fnv1a(bytes: &[u8]) -> u32 {
	bytes.iter().fold(0x811c_9dc5_u32, |hash, &byte| (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193))
}

/// Reference counts generated classes so a rule is removed only once no element uses it anymore.
pub(crate) struct StyleRegistry {
	bridge: Rc<dyn StyleBridge>,
	counts: RefCell<RcHashMap<String, u32, ()>>,
}
impl StyleRegistry {
	pub(crate) fn new(bridge: Rc<dyn StyleBridge>) -> Self {
		Self {
			bridge,
			counts: RefCell::new(RcHashMap::new()),
		}
	}

	/// Returns the class name for `style`, inserting its rule on first use.
	pub(crate) fn acquire(&self, style: &StyleObject) -> String {
		let span = trace_span!("Acquiring style");
		let _enter = span.enter();
		let ComputedStyle { class_name, rule_text } = self.bridge.compute(style);
		match self.counts.borrow_mut().increment_or_insert_with(class_name.clone(), || ()) {
			Ok((_, true)) => {
				trace!("Inserting rule for {}.", class_name);
				self.bridge.insert(&class_name, &rule_text);
			}
			Ok((_, false)) => (),
			Err(_) => error!("Too many references to style class {}", class_name),
		}
		class_name
	}

	pub(crate) fn release(&self, class_name: &str) {
		let mut counts = self.counts.borrow_mut();
		match counts.weak_decrement(class_name) {
			Ok(Some(())) => (),
			Ok(None) => error!("Released unknown style class {}", class_name),
			Err(_) => error!("Released style class {} more often than acquired", class_name),
		}
		for (class_name, ()) in counts.drain_weak() {
			trace!("Removing rule for {}.", class_name);
			self.bridge.remove(&class_name);
		}
	}
}
