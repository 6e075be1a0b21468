//! Per-document runtime configuration.

use crate::{
	error::{ErrorSink, TracingSink},
	frame::{FrameContext, FrameHandle, Fetcher},
	host::Host,
	load::ModuleLoader,
	scheduler::{ManualTicks, TickQueue},
	style::{HashedStyles, StyleBridge, StyleRegistry},
};
use core::cell::RefCell;
use hashbrown::HashMap;
use std::rc::{Rc, Weak};

pub const DEFAULT_DEPTH_LIMIT: usize = 256;

/// Everything reconciliation passes over one document share: the host, the style registry, the error sink and the
/// platform hooks. Created once per document and dropped with it.
pub struct Env<H: Host> {
	pub(crate) host: H,
	pub(crate) styles: StyleRegistry,
	pub(crate) sink: Rc<dyn ErrorSink>,
	pub(crate) loader: Option<Rc<dyn ModuleLoader>>,
	pub(crate) fetcher: Option<Rc<dyn Fetcher>>,
	pub(crate) ticks: Rc<dyn TickQueue>,
	pub(crate) depth_limit: usize,
	pub(crate) frames: RefCell<HashMap<String, Weak<FrameContext<H>>>>,
	manual_ticks: Option<Rc<ManualTicks>>,
}
impl<H: Host> Env<H> {
	pub fn builder(host: H) -> EnvBuilder<H> {
		EnvBuilder {
			host,
			ticks: None,
			styles: None,
			sink: None,
			loader: None,
			fetcher: None,
			depth_limit: DEFAULT_DEPTH_LIMIT,
		}
	}

	#[must_use]
	pub fn host(&self) -> &H {
		&self.host
	}

	/// The default tick queue, if no other one was configured.
	#[must_use]
	pub fn manual_ticks(&self) -> Option<&Rc<ManualTicks>> {
		self.manual_ticks.as_ref()
	}

	/// The live frame with the given id, anywhere in this document.
	#[must_use]
	pub fn frame(&self, id: &str) -> Option<FrameHandle<H>> {
		self.frames.borrow().get(id).and_then(Weak::upgrade).map(FrameHandle::new)
	}
}

#[must_use]
pub struct EnvBuilder<H: Host> {
	host: H,
	ticks: Option<Rc<dyn TickQueue>>,
	styles: Option<Rc<dyn StyleBridge>>,
	sink: Option<Rc<dyn ErrorSink>>,
	loader: Option<Rc<dyn ModuleLoader>>,
	fetcher: Option<Rc<dyn Fetcher>>,
	depth_limit: usize,
}
impl<H: Host> EnvBuilder<H> {
	pub fn tick_queue<T: TickQueue + 'static>(mut self, ticks: Rc<T>) -> Self {
		self.ticks = Some(ticks);
		self
	}

	pub fn style_bridge<S: StyleBridge + 'static>(mut self, styles: Rc<S>) -> Self {
		self.styles = Some(styles);
		self
	}

	pub fn error_sink<S: ErrorSink + 'static>(mut self, sink: Rc<S>) -> Self {
		self.sink = Some(sink);
		self
	}

	pub fn module_loader<L: ModuleLoader + 'static>(mut self, loader: Rc<L>) -> Self {
		self.loader = Some(loader);
		self
	}

	pub fn fetcher<F: Fetcher + 'static>(mut self, fetcher: Rc<F>) -> Self {
		self.fetcher = Some(fetcher);
		self
	}

	/// How deep reconciliation may recurse before failing with [`Error::DepthLimit`](`crate::Error::DepthLimit`).
	pub fn depth_limit(mut self, depth_limit: usize) -> Self {
		self.depth_limit = depth_limit;
		self
	}

	pub fn build(self) -> Rc<Env<H>> {
		let (ticks, manual_ticks): (Rc<dyn TickQueue>, _) = match self.ticks {
			Some(ticks) => (ticks, None),
			None => {
				let manual = Rc::new(ManualTicks::new());
				(Rc::clone(&manual) as Rc<dyn TickQueue>, Some(manual))
			}
		};
		Rc::new(Env {
			host: self.host,
			styles: StyleRegistry::new(self.styles.unwrap_or_else(|| Rc::new(HashedStyles::new()) as Rc<dyn StyleBridge>)),
			sink: self.sink.unwrap_or_else(|| Rc::new(TracingSink) as Rc<dyn ErrorSink>),
			loader: self.loader,
			fetcher: self.fetcher,
			ticks,
			depth_limit: self.depth_limit,
			frames: RefCell::default(),
			manual_ticks,
		})
	}
}
