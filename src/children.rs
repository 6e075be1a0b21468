//! The Child-List Matcher.
//!
//! Children are matched by key where one is given, and otherwise positionally if both the old and new child at an index
//! are unkeyed and comparable. Matched children keep their host nodes and are only moved if they aren't already
//! directly before their successor.

use crate::{
	element::Key,
	error::Error,
	host::Host,
	mounted::{place, Mounted, Owner},
	reconcile::{diff, insert, Cx},
	vnode::VNode,
};
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;
use tracing::{trace, trace_span};

/// Reconciles `old` into `new` within `parent`, before `anchor`.
///
/// # Errors
///
/// [`Error::DuplicateKey`] before any mutation if two new children share a key.
/// Otherwise the first error from diffing or inserting a child. Children inserted by the failed pass are removed
/// again, and `old` keeps its previous children in their previous order.
pub(crate) fn reconcile<H: Host>(
	cx: Cx<'_, H>,
	old: &mut Vec<Mounted<H>>,
	new: Vec<VNode>,
	parent: &H::Node,
	anchor: Option<&H::Node>,
	owner: &Owner<H>,
) -> Result<(), Error> {
	let span = trace_span!("Reconciling children", "old.len()" = old.len(), "new.len()" = new.len());
	let _enter = span.enter();
	let host = cx.host();

	check_keys(&new)?;
	let matches = match_children(old, &new);

	let mut slots: Vec<Option<Mounted<H>>> = old.drain(..).map(Some).collect();
	let mut claimed = vec![false; slots.len()];
	for &i in matches.iter().flatten() {
		claimed[i] = true;
	}
	// Unclaimed children stay until the end so that a failing pass leaves them in place.
	let mut stale = Vec::new();
	for (slot, claimed) in slots.iter().zip(&claimed) {
		if let (Some(mounted), false) = (slot, claimed) {
			mounted.host_nodes(&mut stale);
		}
	}

	// Each placed child with the index of the old child it continues.
	let mut placed: VecDeque<(Option<usize>, Mounted<H>)> = VecDeque::with_capacity(new.len());
	let mut next_anchor = anchor.cloned();
	let mut moves = 0_usize;
	for (vnode, matched) in new.into_iter().zip(matches).rev() {
		let outcome = match matched.and_then(|i| slots[i].take()) {
			Some(mut mounted) => match diff(cx, &mut mounted, vnode, parent, next_anchor.as_ref(), owner) {
				Ok(()) => {
					if place(host, &mounted, parent, next_anchor.as_ref(), &stale) {
						moves += 1;
					}
					Ok(mounted)
				}
				Err(error) => Err((error, Some(mounted))),
			},
			None => insert(cx, vnode, parent, next_anchor.as_ref(), owner, None).map_err(|error| (error, None)),
		};
		match outcome {
			Ok(mounted) => {
				if let Some(first) = mounted.first_host_node() {
					next_anchor = Some(first);
				}
				placed.push_front((matched, mounted));
			}
			Err((error, survivor)) => {
				if let (Some(i), Some(survivor)) = (matched, survivor) {
					slots[i] = Some(survivor);
				}
				for (origin, mounted) in placed {
					match origin {
						Some(i) => slots[i] = Some(mounted),
						None => mounted.detach(cx, Some(parent)),
					}
				}
				restore_order(host, &slots, parent, anchor);
				old.extend(slots.into_iter().flatten());
				return Err(error);
			}
		}
	}

	for unclaimed in slots.into_iter().flatten() {
		unclaimed.detach(cx, Some(parent));
	}
	trace!("Repositioned {} child(ren).", moves);
	old.extend(placed.into_iter().map(|(_, mounted)| mounted));
	Ok(())
}

/// Moves the children of an abandoned pass back into their previous order.
fn restore_order<H: Host>(host: &H, slots: &[Option<Mounted<H>>], parent: &H::Node, anchor: Option<&H::Node>) {
	let mut next_anchor = anchor.cloned();
	for mounted in slots.iter().rev().flatten() {
		place(host, mounted, parent, next_anchor.as_ref(), &[]);
		if let Some(first) = mounted.first_host_node() {
			next_anchor = Some(first);
		}
	}
}

pub(crate) fn check_keys(new: &[VNode]) -> Result<(), Error> {
	let mut seen = HashSet::<&Key>::with_capacity(new.len());
	for key in new.iter().filter_map(VNode::key) {
		if !seen.insert(key) {
			return Err(Error::DuplicateKey(key.clone()));
		}
	}
	Ok(())
}

/// For each new child, the index of the old child it continues, if any.
fn match_children<H: Host>(old: &[Mounted<H>], new: &[VNode]) -> Vec<Option<usize>> {
	let mut by_key = HashMap::<&Key, usize>::new();
	for (i, mounted) in old.iter().enumerate() {
		if let Some(key) = mounted.key() {
			by_key.entry(key).or_insert(i);
		}
	}

	let mut claimed = vec![false; old.len()];
	let mut matches = vec![None; new.len()];
	for (j, child) in new.iter().enumerate() {
		if let Some(&i) = child.key().and_then(|key| by_key.get(key)) {
			if !claimed[i] {
				claimed[i] = true;
				matches[j] = Some(i);
			}
		}
	}
	for (j, child) in new.iter().enumerate() {
		if child.key().is_some() || j >= old.len() || claimed[j] {
			continue;
		}
		if old[j].key().is_none() && old[j].comparable(child) {
			claimed[j] = true;
			matches[j] = Some(j);
		}
	}
	matches
}
