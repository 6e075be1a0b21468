#![doc(html_root_url = "https://docs.rs/arbor-dom/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! A keyed virtual-node reconciler with hydration, error boundaries and independently schedulable frames.
//!
//! Render output ([`Output`]) is normalized into [`VNode`](`vnode::VNode`)s, which a [`Root`] reconciles against
//! what it committed before, mutating the document only through a [`Host`](`host::Host`).
//! Components re-render through a batching [`Scheduler`], and server-rendered markup can be taken over with
//! [`Root::hydrate`] or a [`Hydrator`].

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

mod boundary;
mod children;
pub mod component;
pub mod element;
pub mod env;
pub mod error;
pub mod events;
pub mod frame;
pub mod host;
pub mod hydrate;
pub mod load;
pub mod memory;
mod mounted;
mod rc_hash_map;
mod reconcile;
pub mod root;
pub mod scheduler;
pub mod style;
pub mod vnode;
pub mod web;

pub use crate::{
	component::{CancelToken, ComponentHandle, ComponentType, Scope},
	element::{catch, catch_with, component, fragment, frame, h, AttrValue, Element, Key, Output, StyleObject},
	env::{Env, EnvBuilder},
	error::{Error, ErrorSink, TracingSink},
	events::Event,
	frame::{Fetcher, FrameHandle},
	hydrate::{HydrationReport, Hydrator},
	load::{ModuleLoader, VirtualRootInfo},
	root::Root,
	scheduler::{ManualTicks, Scheduler, TickQueue},
};
