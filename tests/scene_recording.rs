mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ash_lifecycle::prelude::*;
use ash_lifecycle::vulkan::{RecordedCommand, SubpassContents};

use common::*;
use parking_lot::Mutex;

struct DrawList {
    shader: Arc<Shader>,
    geometry: DrawGeometry,
}

impl ItemList for DrawList {
    fn name(&self) -> &str {
        "triangles"
    }

    fn commit(&self, _view: &View, command_buffer: Option<&mut CommandBuffer>) -> Result<()> {
        let Some(command_buffer) = command_buffer else {
            return Ok(());
        };
        command_buffer.draw(&self.shader, &self.geometry, DrawRange::vertices(3))
    }
}

struct FailingList;

impl ItemList for FailingList {
    fn name(&self) -> &str {
        "failing"
    }

    fn commit(&self, _view: &View, _command_buffer: Option<&mut CommandBuffer>) -> Result<()> {
        Err(AshError::OutOfMemory("no room for instance data".into()))
    }
}

#[derive(Default)]
struct PrepareList {
    updates: AtomicU32,
    commits: AtomicU32,
}

impl ItemList for PrepareList {
    fn name(&self) -> &str {
        "prepare"
    }

    fn needs_command_buffer(&self) -> bool {
        false
    }

    fn update(&self, _scene: &Scene, _time: f64) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn commit(&self, _view: &View, command_buffer: Option<&mut CommandBuffer>) -> Result<()> {
        assert!(command_buffer.is_none());
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Marker list that takes `delay` to record and logs when it finished.
struct SlowList {
    name: String,
    delay: Duration,
    finished: Arc<Mutex<Vec<String>>>,
}

impl ItemList for SlowList {
    fn name(&self) -> &str {
        &self.name
    }

    fn commit(&self, _view: &View, command_buffer: Option<&mut CommandBuffer>) -> Result<()> {
        thread::sleep(self.delay);
        if let Some(command_buffer) = command_buffer {
            command_buffer.insert_marker(&self.name)?;
        }
        self.finished.lock().push(self.name.clone());
        Ok(())
    }
}

fn marker(name: &str) -> Arc<dyn ItemList> {
    MarkerList::new(name)
}

struct Fixture {
    renderer: Renderer,
    device: Arc<HeadlessDevice>,
    scene: Scene,
    view: View,
}

fn fixture() -> Fixture {
    let (renderer, device) = renderer();
    let pass = two_subpass_pass(&renderer);
    let framebuffer = offscreen(&renderer, "main", 64, 64);

    let scene_pass = SceneRenderPass::new(
        pass,
        "main",
        Vec::new(),
        vec![
            vec![
                MarkerList::with_pre_render_pass("opaque-1") as Arc<dyn ItemList>,
                marker("opaque-2"),
            ],
            vec![marker("overlay")],
        ],
    )
    .unwrap();
    let scene = Scene::new(
        vec![vec![marker("shared-a"), marker("shared-b")], vec![marker("shared-c")]],
        vec![
            ScenePipelineItem::Compute(marker("compute")),
            ScenePipelineItem::RenderPass(scene_pass),
        ],
    )
    .unwrap();
    let view = View::new("camera", 64, 64).with_framebuffer("main", framebuffer);

    Fixture {
        renderer,
        device,
        scene,
        view,
    }
}

const EXPECTED: [&str; 8] = [
    "shared-a",
    "shared-b",
    "shared-c",
    "compute",
    "opaque-1:pre",
    "opaque-1",
    "opaque-2",
    "overlay",
];

#[test]
fn render_thread_recording_follows_logical_order() {
    let f = fixture();
    f.scene.update(0.0);
    f.scene.draw_main(&f.renderer, &f.view, None).unwrap();
    f.renderer.flush().unwrap();
    f.renderer.wait_until_idle().unwrap();

    assert_eq!(f.device.executed_markers(), EXPECTED);
}

#[test]
fn parallel_recording_matches_the_render_thread() {
    let f = fixture();
    let threads = SceneThreadManager::with_threads(f.renderer.context(), 4).unwrap();
    assert_eq!(threads.thread_count(), 4);

    for frame in 0..4 {
        f.renderer.begin_frame();
        f.scene.update(frame as f64);
        f.scene.draw_main(&f.renderer, &f.view, Some(&threads)).unwrap();
        f.renderer.end_frame().unwrap();
        f.renderer.wait_until_idle().unwrap();

        assert_eq!(f.device.executed_markers(), EXPECTED, "frame {frame}");
        f.device.clear_executed();
    }

    let claimed = threads.claimed_pools();
    assert!(claimed >= 1 && claimed <= 4);
    assert_eq!(f.device.in_flight_violations(), 0);
}

#[test]
fn replay_order_ignores_completion_order() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "main", 16, 16);
    let finished = Arc::new(Mutex::new(Vec::new()));

    // Earlier lists take longest, so workers finish them last.
    let names = ["a", "b", "c", "d", "e"];
    let lists: Vec<Arc<dyn ItemList>> = names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            Arc::new(SlowList {
                name: name.to_string(),
                delay: Duration::from_millis(20 * (names.len() - 1 - index) as u64),
                finished: Arc::clone(&finished),
            }) as Arc<dyn ItemList>
        })
        .collect();
    let scene = Scene::new(
        Vec::new(),
        vec![ScenePipelineItem::RenderPass(
            SceneRenderPass::new(pass, "main", Vec::new(), vec![lists]).unwrap(),
        )],
    )
    .unwrap();
    let view = View::new("camera", 16, 16).with_framebuffer("main", framebuffer);
    let threads = SceneThreadManager::with_threads(renderer.context(), names.len()).unwrap();

    scene.draw_main(&renderer, &view, Some(&threads)).unwrap();
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();

    let completion = finished.lock().clone();
    let position = |name: &str| completion.iter().position(|done| done == name).unwrap();
    assert!(position("e") < position("a"), "{completion:?}");
    assert_eq!(device.executed_markers(), names);
}

#[test]
fn subpasses_are_replayed_from_secondary_buffers() {
    let f = fixture();
    let threads = SceneThreadManager::with_threads(f.renderer.context(), 2).unwrap();
    f.scene.draw_main(&f.renderer, &f.view, Some(&threads)).unwrap();
    f.renderer.flush().unwrap();
    f.renderer.wait_until_idle().unwrap();

    let commands = f.device.executed_commands();
    let contents: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginRenderPass { contents, .. } => Some(*contents),
            RecordedCommand::NextSubpass(contents) => Some(*contents),
            _ => None,
        })
        .collect();
    assert_eq!(
        contents,
        vec![
            SubpassContents::SecondaryCommandBuffers,
            SubpassContents::SecondaryCommandBuffers
        ]
    );
    let executes = commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::ExecuteCommands(_)))
        .count();
    assert_eq!(executes, 3);
}

#[test]
fn workers_build_pipelines_against_the_inherited_pass() {
    let (renderer, device) = renderer();
    let pass = color_pass(&renderer, Samples::Explicit(1));
    let framebuffer = offscreen(&renderer, "main", 32, 32);
    let shader = flat_shader(&renderer, "flat");
    let buffer = vertex_buffer(&renderer);

    let lists: Vec<Arc<dyn ItemList>> = (0..6)
        .map(|_| {
            Arc::new(DrawList {
                shader: Arc::clone(&shader),
                geometry: triangle(&buffer),
            }) as Arc<dyn ItemList>
        })
        .collect();
    let scene = Scene::new(
        Vec::new(),
        vec![ScenePipelineItem::RenderPass(
            SceneRenderPass::new(Arc::clone(&pass), "main", Vec::new(), vec![lists]).unwrap(),
        )],
    )
    .unwrap();
    let view = View::new("camera", 32, 32).with_framebuffer("main", framebuffer);
    let threads = renderer.create_thread_manager().unwrap();

    scene.draw_main(&renderer, &view, Some(&threads)).unwrap();
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();

    assert_eq!(shader.pipeline_count(), 1);
    let draws = device
        .executed_commands()
        .into_iter()
        .filter(|command| matches!(command, RecordedCommand::Draw(_)))
        .count();
    assert_eq!(draws, 6);
    assert_eq!(device.in_flight_violations(), 0);
}

#[test]
fn failing_lists_are_skipped() {
    let (renderer, device) = renderer();
    let scene = Scene::new(
        vec![vec![
            marker("before"),
            Arc::new(FailingList) as Arc<dyn ItemList>,
            marker("after"),
        ]],
        Vec::new(),
    )
    .unwrap();
    let view = View::new("camera", 1, 1);

    scene.draw_main(&renderer, &view, None).unwrap();
    renderer.flush().unwrap();
    let threads = SceneThreadManager::with_threads(renderer.context(), 2).unwrap();
    scene.draw_main(&renderer, &view, Some(&threads)).unwrap();
    renderer.flush().unwrap();
    renderer.wait_until_idle().unwrap();

    assert_eq!(
        device.executed_markers(),
        vec!["before", "after", "before", "after"]
    );
}

#[test]
fn data_only_lists_commit_without_a_command_buffer() {
    let (renderer, _device) = renderer();
    let prepare = Arc::new(PrepareList::default());
    let scene = Scene::new(
        vec![vec![Arc::clone(&prepare) as Arc<dyn ItemList>]],
        Vec::new(),
    )
    .unwrap();
    let view = View::new("camera", 1, 1);
    let threads = SceneThreadManager::with_threads(renderer.context(), 2).unwrap();

    scene.update(0.0);
    scene.draw_main(&renderer, &view, None).unwrap();
    scene.draw_main(&renderer, &view, Some(&threads)).unwrap();

    assert_eq!(prepare.updates.load(Ordering::Relaxed), 1);
    assert_eq!(prepare.commits.load(Ordering::Relaxed), 2);
}

#[test]
fn missing_view_framebuffer_is_an_error() {
    let f = fixture();
    let bare = View::new("bare", 64, 64);
    assert!(f.scene.draw_main(&f.renderer, &bare, None).is_err());
    let threads = SceneThreadManager::with_threads(f.renderer.context(), 2).unwrap();
    assert!(f.scene.draw_main(&f.renderer, &bare, Some(&threads)).is_err());
}

#[test]
fn scenes_need_item_lists() {
    assert!(matches!(
        Scene::new(Vec::new(), Vec::new()),
        Err(AshError::InvalidArgument(_))
    ));
}
