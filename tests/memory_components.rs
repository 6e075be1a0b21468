use arbor_dom::{
	catch, component, h,
	host::Host,
	memory::MemoryHost,
	CancelToken, ComponentHandle, ComponentType, Env, Error, ErrorSink, Root,
};
use futures::executor::block_on;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
	cell::{Cell, RefCell},
	rc::Rc,
};

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

fn setup() -> (MemoryHost, Rc<Recorder>, Root<MemoryHost>) {
	let host = MemoryHost::new();
	let recorder = Rc::new(Recorder::default());
	let env = Env::builder(host.clone()).error_sink(Rc::clone(&recorder)).build();
	let root = Root::new(&env, host.root());
	(host, recorder, root)
}

type Slot<T> = Rc<RefCell<Option<T>>>;

/// A component showing `state`, exposing its handle and counting its renders.
fn counter(state: &Rc<Cell<i32>>, renders: &Rc<Cell<usize>>, handle: &Slot<ComponentHandle>) -> ComponentType {
	let (state, renders, handle) = (Rc::clone(state), Rc::clone(renders), Rc::clone(handle));
	ComponentType::new("Counter", move |scope| {
		renders.set(renders.get() + 1);
		*handle.borrow_mut() = Some(scope.handle());
		Ok(h("p").child(state.get()).into())
	})
}

#[test]
fn updates_within_one_turn_share_a_tick() {
	let (host, _, mut root) = setup();
	let (state, renders, handle) = (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)), Slot::default());
	root.render(component(&counter(&state, &renders, &handle), Value::Null)).unwrap();
	let ticks = Rc::clone(root.env().manual_ticks().unwrap());
	let handle = handle.borrow().clone().unwrap();

	state.set(1);
	handle.update();
	state.set(2);
	handle.update();
	handle.update();
	assert_eq!(ticks.pending(), 1);
	assert!(!root.scheduler().is_idle());

	assert_eq!(ticks.run_until_idle().unwrap(), 1);
	assert_eq!(renders.get(), 2);
	assert_eq!(host.to_markup(host.root()), "<p>2</p>");
	assert!(root.scheduler().is_idle());
}

#[test]
fn descendants_of_rerendering_components_are_not_rendered_twice() {
	let (host, _, mut root) = setup();
	let (state, child_renders, child_handle) = (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)), Slot::default());
	let child = counter(&state, &child_renders, &child_handle);
	let parent_handle: Slot<ComponentHandle> = Slot::default();
	let parent = {
		let parent_handle = Rc::clone(&parent_handle);
		ComponentType::new("Parent", move |scope| {
			*parent_handle.borrow_mut() = Some(scope.handle());
			Ok(h("div").child(component(&child, Value::Null)).into())
		})
	};
	root.render(component(&parent, Value::Null)).unwrap();
	let ticks = Rc::clone(root.env().manual_ticks().unwrap());

	state.set(5);
	child_handle.borrow().as_ref().unwrap().update();
	parent_handle.borrow().as_ref().unwrap().update();
	ticks.run_until_idle().unwrap();

	assert_eq!(child_renders.get(), 2);
	assert_eq!(host.to_markup(host.root()), "<div><p>5</p></div>");
}

#[test]
fn hook_state_survives_rerenders() {
	let (host, _, mut root) = setup();
	let clicker = ComponentType::new("Clicker", |scope| {
		let count = scope.hook(|| Cell::new(0))?;
		let handle = scope.handle();
		let clicks = Rc::clone(&count);
		Ok(h("button")
			.on("click", move |_| {
				clicks.set(clicks.get() + 1);
				handle.update();
			})
			.child(count.get())
			.into())
	});
	root.render(component(&clicker, Value::Null)).unwrap();
	let button = host.first_child(&host.root()).unwrap();

	assert_eq!(host.dispatch(button, "click", &()), 1);
	root.env().manual_ticks().unwrap().run_until_idle().unwrap();
	assert_eq!(host.to_markup(host.root()), "<button>1</button>");

	host.dispatch(button, "click", &());
	host.dispatch(button, "click", &());
	root.env().manual_ticks().unwrap().run_until_idle().unwrap();
	assert_eq!(host.to_markup(host.root()), "<button>3</button>");
}

#[test]
fn hooks_changing_type_are_fatal() {
	let (_, _, mut root) = setup();
	let switched = Rc::new(Cell::new(false));
	let handle: Slot<ComponentHandle> = Slot::default();
	let fickle = {
		let (switched, handle) = (Rc::clone(&switched), Rc::clone(&handle));
		ComponentType::new("Fickle", move |scope| {
			*handle.borrow_mut() = Some(scope.handle());
			if switched.get() {
				scope.hook(String::new)?;
			} else {
				scope.hook(|| 0_u32)?;
			}
			Ok("fickle".into())
		})
	};
	root.render(component(&fickle, Value::Null)).unwrap();

	switched.set(true);
	handle.borrow().as_ref().unwrap().update();
	let result = root.env().manual_ticks().unwrap().run_until_idle();
	assert!(matches!(result, Err(Error::InvariantViolation(_))));
}

#[test]
fn context_comes_from_the_nearest_provider() {
	let consumer = ComponentType::new("Consumer", |scope| {
		let theme = scope.context::<String>().map_or_else(|| "none".to_owned(), |theme| (*theme).clone());
		Ok(h("div").child(theme).into())
	});
	let provider = {
		let consumer = consumer.clone();
		ComponentType::new("Provider", move |scope| {
			scope.provide_context("dark".to_owned());
			Ok(component(&consumer, Value::Null).into())
		})
	};

	let (host, _, mut root) = setup();
	root.render(component(&provider, Value::Null)).unwrap();
	assert_eq!(host.to_markup(host.root()), "<div>dark</div>");

	let (host, _, mut root) = setup();
	root.render(component(&consumer, Value::Null)).unwrap();
	assert_eq!(host.to_markup(host.root()), "<div>none</div>");
}

#[test]
fn props_deserialize_into_typed_structs() {
	#[derive(Deserialize)]
	struct Greeting {
		name: String,
	}
	let greet = ComponentType::new("Greet", |scope| {
		let Greeting { name } = scope.props_as()?;
		Ok(format!("hello {}", name).into())
	});

	let (host, recorder, mut root) = setup();
	root.render(component(&greet, json!({ "name": "world" }))).unwrap();
	assert_eq!(host.to_markup(host.root()), "hello world");

	root.render(component(&greet, json!({ "nickname": "world" }))).unwrap();
	assert_eq!(host.to_markup(host.root()), "hello world");
	assert!(recorder.reported.borrow()[0].starts_with("render failed: invalid props for Greet"));
}

#[test]
fn children_are_passed_through() {
	let card = ComponentType::new("Card", |scope| Ok(h("article").child(scope.children()).into()));
	let (host, _, mut root) = setup();
	root.render(component(&card, Value::Null).child(h("h1").child("title")).child("body")).unwrap();
	assert_eq!(host.to_markup(host.root()), "<article><h1>title</h1>body</article>");
}

#[test]
fn removal_runs_teardown_and_cancels_tokens() {
	let (_, _, mut root) = setup();
	let torn_down = Rc::new(Cell::new(false));
	let tokens: Rc<RefCell<Vec<CancelToken>>> = Rc::default();
	let handle: Slot<ComponentHandle> = Slot::default();
	let worker = {
		let (torn_down, tokens, handle) = (Rc::clone(&torn_down), Rc::clone(&tokens), Rc::clone(&handle));
		ComponentType::new("Worker", move |scope| {
			if tokens.borrow().is_empty() {
				let torn_down = Rc::clone(&torn_down);
				scope.on_teardown(move || torn_down.set(true));
			}
			tokens.borrow_mut().push(scope.token());
			*handle.borrow_mut() = Some(scope.handle());
			Ok(().into())
		})
	};
	root.render(component(&worker, Value::Null)).unwrap();
	let handle = handle.borrow().clone().unwrap();

	handle.update();
	root.env().manual_ticks().unwrap().run_until_idle().unwrap();
	{
		let tokens = tokens.borrow();
		assert!(tokens[0].is_cancelled());
		assert!(!tokens[1].is_cancelled());
		assert_eq!(block_on(tokens[1].clone().guard(async { 1 })), Some(1));
	}

	root.render(h("div")).unwrap();
	assert!(torn_down.get());
	assert!(handle.is_removed());
	let latest = tokens.borrow()[1].clone();
	assert!(latest.is_cancelled());
	assert_eq!(block_on(latest.guard(async { 1 })), None);

	handle.update();
	assert!(root.scheduler().is_idle());
}

#[test]
fn tasks_run_after_rendering_in_order() {
	let (_, _, mut root) = setup();
	let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
	let logger = {
		let log = Rc::clone(&log);
		ComponentType::new("Logger", move |scope| {
			log.borrow_mut().push("render");
			let (first, second) = (Rc::clone(&log), Rc::clone(&log));
			scope.queue_task(move || {
				first.borrow_mut().push("first task");
				Ok(())
			});
			scope.queue_task(move || {
				second.borrow_mut().push("second task");
				Ok(())
			});
			Ok(().into())
		})
	};
	root.render(component(&logger, Value::Null)).unwrap();
	assert_eq!(*log.borrow(), vec!["render"]);

	root.env().manual_ticks().unwrap().run_until_idle().unwrap();
	assert_eq!(*log.borrow(), vec!["render", "first task", "second task"]);
}

#[test]
fn failing_tasks_fail_the_tick() {
	let (_, _, mut root) = setup();
	let ran = Rc::new(Cell::new(false));
	let flaky = {
		let ran = Rc::clone(&ran);
		ComponentType::new("Flaky", move |scope| {
			scope.queue_task(|| Err(Error::task("nope")));
			let ran = Rc::clone(&ran);
			scope.queue_task(move || {
				ran.set(true);
				Ok(())
			});
			Ok(().into())
		})
	};
	root.render(component(&flaky, Value::Null)).unwrap();

	let result = root.env().manual_ticks().unwrap().run_until_idle();
	assert!(matches!(result, Err(Error::Task(_))));
	assert!(!ran.get());
}

#[test]
fn failing_rerender_trips_the_enclosing_boundary() {
	let (host, recorder, mut root) = setup();
	let broken = Rc::new(Cell::new(false));
	let handle: Slot<ComponentHandle> = Slot::default();
	let fragile = {
		let (broken, handle) = (Rc::clone(&broken), Rc::clone(&handle));
		ComponentType::new("Fragile", move |scope| {
			*handle.borrow_mut() = Some(scope.handle());
			if broken.get() {
				Err(Error::render("broke"))
			} else {
				Ok(h("p").child("fine").into())
			}
		})
	};
	root.render(h("main").child(catch("error").child(component(&fragile, Value::Null)))).unwrap();
	assert_eq!(host.to_markup(host.root()), "<main><p>fine</p></main>");

	broken.set(true);
	handle.borrow().as_ref().unwrap().update();
	root.env().manual_ticks().unwrap().run_until_idle().unwrap();
	assert_eq!(host.to_markup(host.root()), "<main>error</main>");
	assert_eq!(*recorder.caught.borrow(), vec!["render failed: broke".to_owned()]);
}

#[test]
fn rerenders_land_before_siblings_that_replaced_their_nodes() {
	let (host, _, mut root) = setup();
	let (items, swapped) = (Rc::new(Cell::new(1)), Rc::new(Cell::new(false)));
	let (list_handle, tail_handle): (Slot<ComponentHandle>, Slot<ComponentHandle>) = (Slot::default(), Slot::default());
	let list = {
		let (items, list_handle) = (Rc::clone(&items), Rc::clone(&list_handle));
		ComponentType::new("List", move |scope| {
			*list_handle.borrow_mut() = Some(scope.handle());
			Ok((1..=items.get()).map(|i| format!("a{}", i)).collect::<Vec<_>>().into())
		})
	};
	let tail = {
		let (swapped, tail_handle) = (Rc::clone(&swapped), Rc::clone(&tail_handle));
		ComponentType::new("Tail", move |scope| {
			*tail_handle.borrow_mut() = Some(scope.handle());
			Ok(if swapped.get() { h("span") } else { h("p") }.into())
		})
	};
	root.render(h("div").child(component(&list, Value::Null)).child(component(&tail, Value::Null))).unwrap();
	let ticks = Rc::clone(root.env().manual_ticks().unwrap());
	assert_eq!(host.to_markup(host.root()), "<div>a1<p></p></div>");

	swapped.set(true);
	tail_handle.borrow().as_ref().unwrap().update();
	ticks.run_until_idle().unwrap();
	assert_eq!(host.to_markup(host.root()), "<div>a1<span></span></div>");

	items.set(2);
	list_handle.borrow().as_ref().unwrap().update();
	ticks.run_until_idle().unwrap();
	assert_eq!(host.to_markup(host.root()), "<div>a1<!---->a2<span></span></div>");
}

#[test]
fn equally_named_components_render_their_latest_closure() {
	let (host, _, mut root) = setup();
	let label = |text: &'static str| ComponentType::new("Label", move |_| Ok(text.into()));

	root.render(component(&label("first"), Value::Null)).unwrap();
	let text = host.first_child(&host.root()).unwrap();
	root.render(component(&label("second"), Value::Null)).unwrap();

	assert_eq!(host.to_markup(host.root()), "second");
	assert_eq!(host.first_child(&host.root()), Some(text));
}
