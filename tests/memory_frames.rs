use arbor_dom::{
	catch, component,
	element::FrameStatus,
	frame, h,
	memory::MemoryHost,
	ComponentHandle, ComponentType, Env, Error, ErrorSink, Fetcher, Root,
};
use futures::{channel::oneshot, executor::block_on, future::LocalBoxFuture, FutureExt};
use hashbrown::HashMap;
use serde_json::Value;
use std::{cell::RefCell, rc::Rc};

#[derive(Default)]
struct Recorder {
	reported: RefCell<Vec<String>>,
	caught: RefCell<Vec<String>>,
}
impl ErrorSink for Recorder {
	fn report(&self, error: &Error) {
		self.reported.borrow_mut().push(error.to_string());
	}

	fn caught(&self, error: &Error) {
		self.caught.borrow_mut().push(error.to_string());
	}
}

/// Serves fixed markup by `src`.
struct Pages(HashMap<&'static str, &'static str>);
impl Fetcher for Pages {
	fn fetch(&self, src: &str) -> LocalBoxFuture<'static, Result<String, Error>> {
		let result = self.0.get(src).map(|markup| (*markup).to_owned()).ok_or_else(|| Error::Fetch {
			src: src.to_owned(),
			message: "not found".to_owned(),
		});
		async move { result }.boxed_local()
	}
}

/// Answers fetches only once the test sends a response.
#[derive(Default)]
struct Deferred {
	responses: RefCell<Vec<oneshot::Sender<String>>>,
}
impl Fetcher for Deferred {
	fn fetch(&self, src: &str) -> LocalBoxFuture<'static, Result<String, Error>> {
		let (sender, receiver) = oneshot::channel();
		self.responses.borrow_mut().push(sender);
		let src = src.to_owned();
		async move {
			receiver.await.map_err(|_| Error::Fetch {
				src,
				message: "response dropped".to_owned(),
			})
		}
		.boxed_local()
	}
}

fn setup() -> (MemoryHost, Rc<Recorder>, Root<MemoryHost>) {
	let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::TRACE).try_init();
	let host = MemoryHost::new();
	let recorder = Rc::new(Recorder::default());
	let env = Env::builder(host.clone()).error_sink(Rc::clone(&recorder)).build();
	let root = Root::new(&env, host.root());
	(host, recorder, root)
}

#[test]
fn frames_render_between_markers_and_unregister_on_removal() {
	let (host, _, mut root) = setup();
	root.render(h("div").child(frame("news").child("x"))).unwrap();
	assert_eq!(host.to_markup(host.root()), "<div><!--frame-->x<!--/frame--></div>");

	let news = root.frame("news").unwrap();
	assert_eq!(news.id(), "news");
	assert_eq!(news.status(), FrameStatus::Ready);
	assert!(root.frame("sports").is_none());

	root.render(h("div")).unwrap();
	assert_eq!(host.to_markup(host.root()), "<div></div>");
	assert!(news.is_removed());
	assert!(root.frame("news").is_none());
	news.replace("ignored").unwrap();
	assert_eq!(host.to_markup(host.root()), "<div></div>");
}

#[test]
fn replaced_content_is_left_alone_by_parent_diffs() {
	let (host, _, mut root) = setup();
	root.render(frame("news").child("a")).unwrap();
	let news = root.frame("news").unwrap();

	news.replace(vec![h("b").child("b"), h("i").child("c")]).unwrap();
	assert_eq!(host.to_markup(host.root()), "<!--frame--><b>b</b><i>c</i><!--/frame-->");

	root.render(frame("news").child("z")).unwrap();
	assert_eq!(host.to_markup(host.root()), "<!--frame--><b>b</b><i>c</i><!--/frame-->");
}

#[test]
fn markup_replaces_frame_content() {
	let (host, _, mut root) = setup();
	root.render(h("aside").child(frame("news").child(h("p").child("old")))).unwrap();
	let news = root.frame("news").unwrap();

	assert!(block_on(news.replace_markup("<p>new</p><hr>")).unwrap());
	assert_eq!(host.to_markup(host.root()), "<aside><!--frame--><p>new</p><hr><!--/frame--></aside>");
}

#[test]
fn reload_fetches_from_src() {
	let host = MemoryHost::new();
	let pages = Rc::new(Pages([("/news", "<p>fresh</p>")].into_iter().collect()));
	let env = Env::builder(host.clone()).fetcher(pages).build();
	let mut root = Root::new(&env, host.root());
	root.render(vec![frame("news").src("/news").child("stale"), frame("other").src("/gone")]).unwrap();

	assert_eq!(root.frame("news").unwrap().src().as_deref(), Some("/news"));
	assert!(block_on(root.frame("news").unwrap().reload()).unwrap());
	assert_eq!(host.to_markup(host.root()), "<!--frame--><p>fresh</p><!--/frame--><!--frame--><!--/frame-->");

	assert!(matches!(block_on(root.frame("other").unwrap().reload()), Err(Error::Fetch { .. })));
}

#[test]
fn reload_needs_a_src_and_a_fetcher() {
	let (_, _, mut root) = setup();
	root.render(vec![frame("plain"), frame("remote").src("/remote")]).unwrap();
	assert!(matches!(block_on(root.frame("plain").unwrap().reload()), Err(Error::InvariantViolation(_))));
	assert!(matches!(block_on(root.frame("remote").unwrap().reload()), Err(Error::Fetch { .. })));
}

#[test]
fn later_content_supersedes_a_reload_in_flight() {
	let host = MemoryHost::new();
	let deferred = Rc::new(Deferred::default());
	let env = Env::builder(host.clone()).fetcher(Rc::clone(&deferred)).build();
	let mut root = Root::new(&env, host.root());
	root.render(frame("news").src("/news").child("old")).unwrap();
	let news = root.frame("news").unwrap();

	let mut reload = Box::pin(news.reload());
	assert!(reload.as_mut().now_or_never().is_none());
	news.replace("mine").unwrap();

	let response = deferred.responses.borrow_mut().pop().unwrap();
	response.send("<p>late</p>".to_owned()).unwrap();
	assert!(!block_on(reload).unwrap());
	assert_eq!(host.to_markup(host.root()), "<!--frame-->mine<!--/frame-->");
}

#[test]
fn errors_inside_frames_are_reported_not_caught() {
	let (host, recorder, mut root) = setup();
	let failing = ComponentType::new("Failing", |_| Err(Error::render("boom")));
	root.render(catch("caught").child(h("p").child("before")).child(frame("news").child(component(&failing, Value::Null))))
		.unwrap();

	assert_eq!(host.to_markup(host.root()), "<p>before</p><!--frame--><!--/frame-->");
	assert_eq!(*recorder.reported.borrow(), vec!["render failed: boom".to_owned()]);
	assert!(recorder.caught.borrow().is_empty());
}

#[test]
fn components_in_frames_use_the_frame_scheduler() {
	let (host, _, mut root) = setup();
	let handle: Rc<RefCell<Option<ComponentHandle>>> = Rc::default();
	let theme = {
		let handle = Rc::clone(&handle);
		ComponentType::new("Theme", move |scope| {
			*handle.borrow_mut() = Some(scope.handle());
			let theme = scope.context::<&'static str>().map_or("none", |theme| *theme);
			Ok(theme.into())
		})
	};
	let provider = {
		let theme = theme.clone();
		ComponentType::new("Provider", move |scope| {
			scope.provide_context("dark");
			Ok(frame("island").child(component(&theme, Value::Null)).into())
		})
	};
	root.render(component(&provider, Value::Null)).unwrap();
	assert_eq!(host.to_markup(host.root()), "<!--frame-->dark<!--/frame-->");

	let island = root.frame("island").unwrap();
	handle.borrow().as_ref().unwrap().update();
	assert!(root.scheduler().is_idle());
	assert!(!island.scheduler().is_idle());

	island.scheduler().tick().unwrap();
	assert!(island.scheduler().is_idle());
	assert_eq!(host.to_markup(host.root()), "<!--frame-->dark<!--/frame-->");
}
