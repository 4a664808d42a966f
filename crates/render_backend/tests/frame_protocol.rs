//! End-to-end frame protocol tests against the headless driver

use ash::vk;
use std::time::Duration;

use render_backend::backend::driver::headless::DriverCall;
use render_backend::backend::driver::AcquireOutcome;
use render_backend::backend::{
    DrawItem, DrawList, Fault, FrameOutcome, HeadlessInstance, HeadlessProfile, PipelineHandle, PipelineSpecification,
    PipelineUsage, Renderer, ShaderCode, ShaderReflection, SubpassTag, VulkanError,
};
use render_backend::config::{BackendConfig, PresentMode};

const EXTENT: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };
const SUBPASSES: [SubpassTag; 3] = [SubpassTag::Swapchain, SubpassTag::Depth, SubpassTag::Color];

fn config() -> BackendConfig {
    BackendConfig::new("frame protocol").with_frames_in_flight(2)
}

fn build(instance: &HeadlessInstance, config: BackendConfig) -> Renderer {
    Renderer::new(instance, config, EXTENT, &SUBPASSES).unwrap()
}

fn spirv_header() -> Vec<u8> {
    [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

fn triangle_pipeline(renderer: &mut Renderer) -> PipelineHandle {
    let stage = |stage| ShaderCode::from_bytes(stage, &spirv_header(), ShaderReflection::new()).unwrap();
    let spec = PipelineSpecification::new(vec![
        stage(vk::ShaderStageFlags::VERTEX),
        stage(vk::ShaderStageFlags::FRAGMENT),
    ]);
    renderer.create_pipeline(spec, PipelineUsage::Graphics).unwrap()
}

fn submitted_buffers(calls: &[DriverCall]) -> Vec<vk::CommandBuffer> {
    calls
        .iter()
        .filter_map(|call| match call {
            DriverCall::QueueSubmit { command_buffers, .. } => Some(command_buffers[0]),
            _ => None,
        })
        .collect()
}

fn is_wait(call: &DriverCall) -> bool {
    matches!(call, DriverCall::WaitForFence { .. })
}

fn is_acquire(call: &DriverCall) -> bool {
    matches!(call, DriverCall::AcquireNextImage { .. })
}

fn is_submit(call: &DriverCall) -> bool {
    matches!(call, DriverCall::QueueSubmit { .. })
}

fn is_present(call: &DriverCall) -> bool {
    matches!(call, DriverCall::QueuePresent { .. })
}

fn count(calls: &[DriverCall], filter: fn(&DriverCall) -> bool) -> usize {
    calls.iter().filter(|call| filter(call)).count()
}

#[test]
fn test_ten_frames_follow_the_protocol() {
    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    assert_eq!(renderer.image_count(), 3);
    let pipeline = triangle_pipeline(&mut renderer);
    let list: DrawList = [DrawItem::vertices(pipeline, 3)].into_iter().collect();
    instance.clear_calls();

    let mut slots = Vec::new();
    let mut images = Vec::new();
    for _ in 0..10 {
        assert_eq!(renderer.current_frame(), slots.len() % 2);
        match renderer.draw_frame(&list).unwrap() {
            FrameOutcome::Presented { slot, image_index } => {
                slots.push(slot);
                images.push(image_index);
            }
            FrameOutcome::Skipped => panic!("frame skipped"),
        }
    }
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(images, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(renderer.current_frame(), 0);

    let calls = instance.calls();
    assert_eq!(count(&calls, is_wait), 10);
    assert_eq!(count(&calls, is_acquire), 10);
    assert_eq!(count(&calls, is_submit), 10);
    assert_eq!(count(&calls, is_present), 10);
    assert_eq!(calls.iter().filter(|call| **call == DriverCall::Draw { vertex_count: 3 }).count(), 10);

    // Each slot records into its own buffer
    let buffers = submitted_buffers(&calls);
    for (frame, buffer) in buffers.iter().enumerate() {
        assert_eq!(*buffer, buffers[frame % 2]);
    }
    assert_ne!(buffers[0], buffers[1]);

    // Per frame: wait, acquire, reset, submit, present
    let protocol: Vec<&DriverCall> = calls
        .iter()
        .filter(|call| {
            is_wait(call)
                || is_acquire(call)
                || is_submit(call)
                || is_present(call)
                || matches!(call, DriverCall::ResetFence { .. })
        })
        .collect();
    for frame in protocol.chunks(5) {
        let DriverCall::WaitForFence { fence: waited } = frame[0] else {
            panic!("frame starts with {:?}", frame[0]);
        };
        let DriverCall::AcquireNextImage { semaphore, .. } = frame[1] else {
            panic!("second call is {:?}", frame[1]);
        };
        assert_eq!(frame[2], &DriverCall::ResetFence { fence: *waited });
        let DriverCall::QueueSubmit { wait, signal, fence, .. } = frame[3] else {
            panic!("fourth call is {:?}", frame[3]);
        };
        assert_eq!(wait, &vec![*semaphore]);
        assert_eq!(fence, waited);
        let DriverCall::QueuePresent { wait: present_wait, .. } = frame[4] else {
            panic!("fifth call is {:?}", frame[4]);
        };
        assert_eq!(present_wait, signal);
    }

    assert_eq!(renderer.stats().frames_presented, 10);
    assert!(instance.violations().is_empty(), "{:?}", instance.violations());
}

#[test]
fn test_fence_is_waited_before_every_reset() {
    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    for _ in 0..6 {
        renderer.draw_frame(&DrawList::new()).unwrap();
    }

    let calls = instance.calls();
    for (index, call) in calls.iter().enumerate() {
        let DriverCall::ResetFence { fence } = call else { continue };
        let last_submit = calls[..index]
            .iter()
            .rposition(|c| matches!(c, DriverCall::QueueSubmit { fence: f, .. } if f == fence));
        let last_wait = calls[..index]
            .iter()
            .rposition(|c| *c == DriverCall::WaitForFence { fence: *fence });
        if let Some(submit) = last_submit {
            assert!(last_wait.is_some_and(|wait| wait > submit), "fence {fence:?} reset without a wait");
        }
    }
    assert!(instance.violations().is_empty(), "{:?}", instance.violations());
}

#[test]
fn test_one_fence_wait_per_frame_for_any_image_count() {
    for (min, max, expected) in [(1, 2, 2), (2, 8, 3), (3, 0, 4)] {
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_image_count(min, max));
        let mut renderer = build(&instance, config());
        assert_eq!(renderer.image_count(), expected);
        let pipeline = triangle_pipeline(&mut renderer);
        let list: DrawList = [DrawItem::vertices(pipeline, 3)].into_iter().collect();
        instance.clear_calls();

        let mut images = Vec::new();
        for _ in 0..9 {
            if let FrameOutcome::Presented { image_index, .. } = renderer.draw_frame(&list).unwrap() {
                images.push(image_index);
            }
        }
        let cycle: Vec<u32> = (0..9).map(|frame| frame % expected as u32).collect();
        assert_eq!(images, cycle, "{expected} images");

        let calls = instance.calls();
        assert_eq!(count(&calls, is_wait), 9, "{expected} images");
        let mut buffers = submitted_buffers(&calls);
        buffers.sort();
        buffers.dedup();
        assert_eq!(buffers.len(), 2, "one command buffer per slot");
        assert!(instance.violations().is_empty(), "{:?}", instance.violations());
    }
}

#[test]
fn test_minimized_surface_suspends_frames() {
    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    assert!(matches!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Presented { .. }));

    instance.set_surface_extent(Some(vk::Extent2D { width: 0, height: 0 }));
    assert_eq!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Skipped);
    assert_eq!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Skipped);
    assert_eq!(renderer.image_count(), 0);

    instance.set_surface_extent(Some(EXTENT));
    assert!(matches!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Presented { .. }));
    assert_eq!(renderer.extent(), EXTENT);
    assert_eq!(renderer.stats().frames_skipped, 2);
    assert_eq!(renderer.stats().frames_presented, 2);
    assert!(instance.violations().is_empty(), "{:?}", instance.violations());
}

#[test]
fn test_stale_acquire_recreates_and_abandons_frame() {
    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    instance.inject(Fault::OutOfDateOnAcquire(3));

    let outcomes: Vec<FrameOutcome> = (0..5).map(|_| renderer.draw_frame(&DrawList::new()).unwrap()).collect();
    assert_eq!(outcomes[2], FrameOutcome::Skipped);
    assert_eq!(outcomes.iter().filter(|o| matches!(o, FrameOutcome::Presented { .. })).count(), 4);

    // The abandoned frame's slot is reused by the next frame
    assert!(matches!(outcomes[3], FrameOutcome::Presented { slot: 0, .. }));

    let calls = instance.calls();
    assert_eq!(count(&calls, is_submit), 4);
    assert!(calls.iter().any(|call| matches!(
        call,
        DriverCall::AcquireNextImage { outcome: AcquireOutcome::OutOfDate, .. }
    )));
    assert_eq!(renderer.stats().swapchain_recreations, 1);
    assert_eq!(renderer.stats().frames_skipped, 1);
    assert!(instance.violations().is_empty(), "{:?}", instance.violations());
}

#[test]
fn test_window_resize_is_detected_on_acquire() {
    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    renderer.draw_frame(&DrawList::new()).unwrap();

    let resized = vk::Extent2D { width: 1280, height: 720 };
    instance.set_surface_extent(Some(resized));
    assert_eq!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Skipped);
    assert_eq!(renderer.extent(), resized);
    assert!(matches!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Presented { .. }));
    assert!(instance.violations().is_empty(), "{:?}", instance.violations());
}

#[test]
fn test_suboptimal_or_stale_present_recreates_after_frame() {
    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    instance.inject(Fault::SuboptimalOnPresent(2));
    instance.inject(Fault::OutOfDateOnPresent(4));

    for _ in 0..5 {
        assert!(matches!(renderer.draw_frame(&DrawList::new()).unwrap(), FrameOutcome::Presented { .. }));
    }
    assert_eq!(renderer.stats().swapchain_recreations, 2);
    assert_eq!(renderer.stats().frames_presented, 5);
    assert!(instance.violations().is_empty(), "{:?}", instance.violations());
}

#[test]
fn test_hung_fence_times_out() {
    let instance = HeadlessInstance::default();
    let config = BackendConfig::new("hung")
        .with_frames_in_flight(1)
        .with_fence_timeout(Duration::from_millis(20));
    let mut renderer = build(&instance, config);
    instance.inject(Fault::HungSubmit(1));

    renderer.draw_frame(&DrawList::new()).unwrap();
    let err = renderer.draw_frame(&DrawList::new()).unwrap_err();
    assert!(matches!(err, VulkanError::Timeout { waited } if waited == Duration::from_millis(20)));
    assert!(!err.is_recoverable());
}

#[test]
fn test_present_mode_fallback() {
    let instance = HeadlessInstance::new(HeadlessProfile::default().with_present_modes(vec![vk::PresentModeKHR::FIFO]));
    let renderer = build(&instance, config().with_present_mode(PresentMode::Mailbox));
    assert_eq!(renderer.present_mode(), Some(vk::PresentModeKHR::FIFO));

    let instance = HeadlessInstance::new(
        HeadlessProfile::default().with_present_modes(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE]),
    );
    let renderer = build(&instance, config().with_present_mode(PresentMode::Adaptive));
    assert_eq!(renderer.present_mode(), Some(vk::PresentModeKHR::IMMEDIATE));
}

#[test]
fn test_image_count_respects_surface_bounds() {
    for (min, max, expected) in [(2, 8, 3), (3, 3, 3), (2, 0, 3), (1, 2, 2)] {
        let instance = HeadlessInstance::new(HeadlessProfile::default().with_image_count(min, max));
        let renderer = build(&instance, config());
        assert_eq!(renderer.image_count(), expected, "bounds {min}..{max}");
    }
}

#[test]
fn test_swapchain_reinit_is_deterministic() {
    let created = |instance: &HeadlessInstance| -> Vec<DriverCall> {
        instance
            .calls()
            .into_iter()
            .filter(|call| matches!(call, DriverCall::CreateSwapchain { .. }))
            .collect()
    };

    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    renderer.resize(EXTENT).unwrap();
    let calls = created(&instance);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);

    let other = HeadlessInstance::default();
    let _second = build(&other, config());
    assert_eq!(created(&other)[0], calls[0]);
}

#[test]
fn test_drop_releases_every_object() {
    let instance = HeadlessInstance::default();
    let mut renderer = build(&instance, config());
    for _ in 0..4 {
        renderer.draw_frame(&DrawList::new()).unwrap();
    }
    renderer.resize(vk::Extent2D { width: 640, height: 480 }).unwrap();
    drop(renderer);

    assert!(instance.live_objects().is_empty(), "{:?}", instance.live_objects());
    assert!(instance.violations().is_empty(), "{:?}", instance.violations());
}

#[test]
fn test_missing_depth_format_is_fatal() {
    let instance = HeadlessInstance::new(HeadlessProfile::default().with_depth_formats(Vec::new()));
    let result = Renderer::new(&instance, config(), EXTENT, &SUBPASSES);
    assert!(matches!(result, Err(VulkanError::NoSupportedFormat)));
}
