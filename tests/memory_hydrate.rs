use arbor_dom::{
	catch, component, fragment, frame, h,
	host::Host,
	memory::{MemoryHost, Mutation},
	ComponentType, Env, Error, ErrorSink, Hydrator, ModuleLoader, Root, VirtualRootInfo,
};
use futures::{executor::block_on, future::LocalBoxFuture, FutureExt};
use serde_json::json;
use std::{
	cell::{Cell, RefCell},
	rc::Rc,
};

#[derive(Default)]
struct Recorder {
	reported: RefCell<Vec<String>>,
}
impl ErrorSink for Recorder {
	fn report(&self, error: &Error) {
		self.reported.borrow_mut().push(error.to_string());
	}
}

fn greeting() -> ComponentType {
	ComponentType::new("Greeting", |scope| {
		let text = scope.props()["text"].as_str().unwrap_or_default().to_owned();
		let clicks = scope.hook(|| Cell::new(0))?;
		let handle = scope.handle();
		let counter = Rc::clone(&clicks);
		Ok(h("p")
			.attr("data-clicks", clicks.get())
			.on("click", move |_| {
				counter.set(counter.get() + 1);
				handle.update();
			})
			.child(text)
			.into())
	})
}

/// Resolves `Greeting` and `Broken` from `/app.js` and counts requests.
#[derive(Default)]
struct Loader {
	loads: Cell<usize>,
}
impl ModuleLoader for Loader {
	fn load(&self, module_url: &str, export_name: &str) -> LocalBoxFuture<'static, Result<ComponentType, Error>> {
		self.loads.set(self.loads.get() + 1);
		let result = match (module_url, export_name) {
			("/app.js", "Greeting") => Ok(greeting()),
			("/app.js", "Broken") => Ok(ComponentType::new("Broken", |_| Err(Error::render("broken")))),
			_ => Err(Error::Load {
				url: module_url.to_owned(),
				export: export_name.to_owned(),
				message: "not found".to_owned(),
			}),
		};
		async move { result }.boxed_local()
	}
}

#[test]
fn hydrating_matching_markup_mutates_nothing() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), r#"<div id="app"><span>hi</span><em>echo</em><p>42</p></div>"#)
		.unwrap();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());
	let echo = ComponentType::new("Echo", |scope| Ok(h("em").child(scope.props()["text"].as_str().unwrap_or_default().to_owned()).into()));
	let page = || {
		h("div")
			.attr("id", "app")
			.attr("hidden", false)
			.child(h("span").child("hi").on("click", |_| ()))
			.child(component(&echo, json!({ "text": "echo" })))
			.child(catch("error").child(h("p").child(42)))
	};

	let report = root.hydrate(page()).unwrap();
	assert_eq!(report.mismatches, 0);
	assert_eq!(host.take_mutations(), vec![]);
	assert_eq!(host.listener_count(), 1);

	root.render(page()).unwrap();
	assert_eq!(host.take_mutations(), vec![]);
}

#[test]
fn server_markup_round_trips_through_hydration() {
	let echo = ComponentType::new("Echo", |scope| Ok(h("em").child(scope.props()["text"].as_str().unwrap_or_default().to_owned()).into()));
	let page = || {
		h("div")
			.attr("id", "app")
			.child(h("span").child("hi").on("click", |_| ()))
			.child(fragment(vec!["a", "b"]))
			.child(component(&echo, json!({ "text": "echo" })))
			.child(catch("error").child(h("p").child(42)))
			.child(h("p").child("a").child("b").child(()))
	};

	let server = MemoryHost::new();
	let mut server_root = Root::new(&Env::builder(server.clone()).build(), server.root());
	server_root.render(page()).unwrap();
	let markup = server.to_markup(server.root());
	assert_eq!(markup, "<div id=\"app\"><span>hi</span>a<!---->b<em>echo</em><p>42</p><p>a<!---->b</p></div>");

	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), &markup).unwrap();
	host.clear_mutations();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());

	let report = root.hydrate(page()).unwrap();
	assert_eq!(report.mismatches, 0);
	assert_eq!(host.take_mutations(), vec![]);

	root.render(page()).unwrap();
	assert_eq!(host.take_mutations(), vec![]);
	assert_eq!(host.to_markup(host.root()), markup);
}

#[test]
fn merged_server_text_is_split() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), "<p>ab</p>").unwrap();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());

	let report = root.hydrate(h("p").child("a").child("b")).unwrap();
	assert_eq!(report.mismatches, 0);
	let p = host.first_child(&host.root()).unwrap();
	assert_eq!(host.children(p).len(), 2);
	assert_eq!(host.to_markup(host.root()), "<p>a<!---->b</p>");
}

#[test]
fn mismatched_elements_are_replaced() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), "<div><span>x</span></div>").unwrap();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());

	let report = root.hydrate(h("div").child(h("p").child("x"))).unwrap();
	assert_eq!(report.mismatches, 1);
	assert_eq!(host.to_markup(host.root()), "<div><p>x</p></div>");
}

#[test]
fn mismatched_text_is_overwritten() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), "<p>old</p>").unwrap();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());
	let p = host.first_child(&host.root()).unwrap();
	let text = host.first_child(&p).unwrap();

	let report = root.hydrate(h("p").child("new")).unwrap();
	assert_eq!(report.mismatches, 1);
	assert_eq!(
		host.take_mutations(),
		vec![Mutation::SetText {
			node: text,
			data: "new".to_owned(),
		}]
	);
}

#[test]
fn leftover_server_nodes_are_removed() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), "<p>a</p><p>b</p>").unwrap();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());

	let report = root.hydrate(h("p").child("a")).unwrap();
	assert_eq!(report.mismatches, 1);
	assert_eq!(host.to_markup(host.root()), "<p>a</p>");
}

#[test]
fn hydrating_twice_is_an_invariant_violation() {
	let host = MemoryHost::new();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());
	root.render(h("p")).unwrap();
	assert!(matches!(root.hydrate(h("p")), Err(Error::InvariantViolation(_))));
}

#[test]
fn virtual_roots_load_their_modules_and_resume() {
	let host = MemoryHost::new();
	host.set_inner_markup(
		host.root(),
		concat!(
			"<main><!--vroot:greeting-->",
			r#"<script type="application/json">{"moduleUrl":"/app.js","exportName":"Greeting","props":{"text":"hi"}}</script>"#,
			r#"<p data-clicks="0">hi</p><!--/vroot--></main>"#,
		),
	)
	.unwrap();
	let loader = Rc::new(Loader::default());
	let env = Env::builder(host.clone()).module_loader(Rc::clone(&loader)).build();
	let hydrator = Hydrator::new(&env);

	let report = block_on(hydrator.hydrate(&host.root())).unwrap();
	assert_eq!(report.virtual_roots, 1);
	assert_eq!(report.mismatches, 0);
	assert_eq!(loader.loads.get(), 1);
	assert_eq!(host.take_mutations(), vec![]);

	let p = host.find_element(host.root(), "p").unwrap();
	assert_eq!(host.dispatch(p, "click", &()), 1);
	env.manual_ticks().unwrap().run_until_idle().unwrap();
	assert_eq!(
		host.take_mutations(),
		vec![Mutation::SetAttribute {
			element: p,
			name: "data-clicks".to_owned(),
			value: "1".to_owned(),
		}]
	);

	hydrator.unmount();
	assert_eq!(host.listener_count(), 0);
	assert_eq!(host.to_markup(host.root()), r#"<main><!--vroot:greeting--><script type="application/json">{"moduleUrl":"/app.js","exportName":"Greeting","props":{"text":"hi"}}</script><!--/vroot--></main>"#);
}

#[test]
fn registered_info_stands_in_for_a_payload() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), r#"<!--vroot:side--><p data-clicks="0">side</p><!--/vroot-->"#)
		.unwrap();
	let loader = Rc::new(Loader::default());
	let env = Env::builder(host.clone()).module_loader(Rc::clone(&loader)).build();
	let hydrator = Hydrator::new(&env);
	hydrator.register(
		"side",
		VirtualRootInfo {
			module_url: "/app.js".to_owned(),
			export_name: "Greeting".to_owned(),
			props: json!({ "text": "side" }),
		},
	);

	let report = block_on(hydrator.hydrate(&host.root())).unwrap();
	assert_eq!(report.virtual_roots, 1);
	assert_eq!(host.take_mutations(), vec![]);
}

#[test]
fn payloads_without_a_loader_fail_to_load() {
	let host = MemoryHost::new();
	host.set_inner_markup(
		host.root(),
		r#"<!--vroot--><script type="application/json">{"moduleUrl":"/app.js","exportName":"Greeting"}</script><!--/vroot-->"#,
	)
	.unwrap();
	let env = Env::builder(host.clone()).build();
	let hydrator = Hydrator::new(&env);
	assert!(matches!(block_on(hydrator.hydrate(&host.root())), Err(Error::Load { .. })));
}

#[test]
fn unmatched_markers_are_invariant_violations() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), "<!--frame--><p>x</p>").unwrap();
	let env = Env::builder(host.clone()).build();
	let hydrator = Hydrator::new(&env);
	assert!(matches!(
		block_on(hydrator.hydrate(&host.root())),
		Err(Error::InvariantViolation(_))
	));
}

#[test]
fn render_errors_in_one_region_are_reported() {
	let host = MemoryHost::new();
	host.set_inner_markup(
		host.root(),
		concat!(
			r#"<!--vroot--><script type="application/json">{"moduleUrl":"/app.js","exportName":"Broken"}</script><!--/vroot-->"#,
			r#"<!--vroot--><script type="application/json">{"moduleUrl":"/app.js","exportName":"Greeting","props":{"text":"a"}}</script><p data-clicks="0">a</p><!--/vroot-->"#,
		),
	)
	.unwrap();
	let recorder = Rc::new(Recorder::default());
	let loader = Rc::new(Loader::default());
	let env = Env::builder(host.clone())
		.module_loader(Rc::clone(&loader))
		.error_sink(Rc::clone(&recorder))
		.build();
	let hydrator = Hydrator::new(&env);

	let report = block_on(hydrator.hydrate(&host.root())).unwrap();
	assert_eq!(report.virtual_roots, 1);
	assert_eq!(loader.loads.get(), 2);
	assert_eq!(*recorder.reported.borrow(), vec!["render failed: broken".to_owned()]);
	assert_eq!(host.listener_count(), 1);
}

#[test]
fn ready_frames_hydrate_in_place() {
	let host = MemoryHost::new();
	host.set_inner_markup(
		host.root(),
		r#"<section><!--frame--><script type="application/json">{"id":"news","status":"ready"}</script><p>old</p><!--/frame--></section>"#,
	)
	.unwrap();
	let env = Env::builder(host.clone()).build();
	let hydrator = Hydrator::new(&env);

	let report = block_on(hydrator.hydrate(&host.root())).unwrap();
	assert_eq!(report.frames, 1);
	assert_eq!(report.mismatches, 0);
	assert_eq!(host.take_mutations(), vec![]);

	let news = env.frame("news").unwrap();
	let p = host.find_element(host.root(), "p").unwrap();
	let text = host.first_child(&p).unwrap();
	news.replace(h("p").child("new")).unwrap();
	assert_eq!(
		host.take_mutations(),
		vec![Mutation::SetText {
			node: text,
			data: "new".to_owned(),
		}]
	);
}

#[test]
fn root_hydration_claims_frame_markers() {
	let host = MemoryHost::new();
	host.set_inner_markup(
		host.root(),
		r#"<div><!--frame--><script type="application/json">{"id":"side"}</script><b>x</b><!--/frame--></div>"#,
	)
	.unwrap();
	let env = Env::builder(host.clone()).build();
	let mut root = Root::new(&env, host.root());

	let report = root.hydrate(h("div").child(frame("side").child(h("b").child("x")))).unwrap();
	assert_eq!(report.mismatches, 0);
	assert_eq!(host.take_mutations(), vec![]);
	assert!(root.frame("side").is_some());
}

const PENDING: &str = r#"<!--frame--><script type="application/json">{"id":"news","status":"pending"}</script><p>Loading</p><!--/frame-->"#;

#[test]
fn pending_frames_take_content_present_at_hydration() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), &format!(r#"{}<div data-frame-content="news"><p>Item</p></div>"#, PENDING))
		.unwrap();
	let env = Env::builder(host.clone()).build();
	let hydrator = Hydrator::new(&env);

	let report = block_on(hydrator.hydrate(&host.root())).unwrap();
	assert_eq!(report.frames, 1);
	assert_eq!(host.to_markup(host.root()), "<!--frame--><p>Item</p><!--/frame-->");
	assert_eq!(env.frame("news").unwrap().status(), arbor_dom::element::FrameStatus::Ready);
}

#[test]
fn pending_frames_take_content_arriving_later_once() {
	let host = MemoryHost::new();
	host.set_inner_markup(host.root(), PENDING).unwrap();
	let env = Env::builder(host.clone()).build();
	let hydrator = Hydrator::new(&env);
	block_on(hydrator.hydrate(&host.root())).unwrap();
	assert_eq!(host.to_markup(host.root()), PENDING);

	let arrived = |markup: &str| {
		let fragment = host.parse_markup(markup).unwrap();
		let container = host.first_child(&fragment).unwrap();
		block_on(hydrator.content_arrived(&container))
	};
	assert!(arrived(r#"<div data-frame-content="news"><p>Item</p></div>"#).unwrap());
	assert_eq!(host.to_markup(host.root()), "<!--frame--><p>Item</p><!--/frame-->");

	assert!(!arrived(r#"<div data-frame-content="news"><p>Again</p></div>"#).unwrap());
	assert_eq!(host.to_markup(host.root()), "<!--frame--><p>Item</p><!--/frame-->");

	assert!(matches!(arrived("<div></div>"), Err(Error::InvariantViolation(_))));
}
