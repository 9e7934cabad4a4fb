//! Outline behavior through the full engine on the CPU path.

mod common;

use common::*;
use image::{Rgba, RgbaImage};
use pipemagic_core::{
    Capabilities, ImageFrame, NodeKind, PipelineRunner, RunOptions,
};

fn outline_pipeline(params_json: &str) -> pipemagic_core::PipelineDefinition {
    pipeline(
        vec![
            node("in", NodeKind::Input, "{}"),
            node("line", NodeKind::Outline, params_json),
            node("out", NodeKind::Output, r#"{"format": "png"}"#),
        ],
        vec![edge("e1", "in", "line"), edge("e2", "line", "out")],
    )
}

fn centered_square(size: u32, lo: u32, hi: u32) -> ImageFrame {
    ImageFrame::new(RgbaImage::from_fn(size, size, |x, y| {
        if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    }))
}

fn run_to_bitmap(p: &pipemagic_core::PipelineDefinition, input: &ImageFrame) -> RgbaImage {
    let mut runner = PipelineRunner::new(Capabilities::unavailable());
    let out = runner.run(p, input, None, &RunOptions::default()).unwrap();
    image::load_from_memory(&out.blob).unwrap().to_rgba8()
}

#[test]
fn zero_thickness_is_a_pixelwise_no_op() {
    let p = outline_pipeline(r##"{"thickness": 0, "color": "#ff0000"}"##);
    let input = centered_square(64, 20, 44);
    let out = run_to_bitmap(&p, &input);
    assert_eq!(out.as_raw(), input.bitmap().as_raw());
}

#[test]
fn fully_transparent_input_stays_fully_transparent() {
    let p = outline_pipeline(r##"{"thickness": 3, "color": "#00ff00"}"##);
    let input = ImageFrame::new(RgbaImage::new(48, 48));
    let out = run_to_bitmap(&p, &input);
    assert!(out.pixels().all(|px| px.0 == [0, 0, 0, 0]));
}

#[test]
fn outside_band_hugs_the_silhouette() {
    let p = outline_pipeline(
        r##"{"thickness": 2, "color": "#ff0000", "opacity": 1.0, "position": "outside", "threshold": 0}"##,
    );
    let input = centered_square(64, 20, 44);
    let out = run_to_bitmap(&p, &input);

    // Interior untouched.
    assert_eq!(out.get_pixel(32, 32).0, [255, 255, 255, 255]);
    // Adjacent to the edge: solid red.
    assert_eq!(out.get_pixel(19, 32).0, [255, 0, 0, 255]);
    assert_eq!(out.get_pixel(32, 19).0, [255, 0, 0, 255]);
    // Beyond the band: untouched transparency.
    assert_eq!(out.get_pixel(10, 32).0[3], 0);
    // Corners of the image: far from the silhouette.
    assert_eq!(out.get_pixel(0, 0).0[3], 0);
}

#[test]
fn threshold_shifts_the_band_outward() {
    let base = outline_pipeline(r##"{"thickness": 2, "color": "#ff0000", "threshold": 0}"##);
    let shifted = outline_pipeline(r##"{"thickness": 2, "color": "#ff0000", "threshold": -3}"##);
    let input = centered_square(64, 24, 40);

    let out_base = run_to_bitmap(&base, &input);
    let out_shifted = run_to_bitmap(&shifted, &input);

    // With threshold -3, a pixel 4px away from the edge lands in the band.
    assert_eq!(out_base.get_pixel(20, 32).0[3], 0);
    let p = out_shifted.get_pixel(20, 32).0;
    assert_eq!([p[0], p[1], p[2]], [255, 0, 0]);
}

#[test]
fn quality_parameter_is_accepted_but_advisory() {
    let input = centered_square(48, 16, 32);
    let low = run_to_bitmap(
        &outline_pipeline(r##"{"thickness": 2, "color": "#0000ff", "quality": "low"}"##),
        &input,
    );
    let high = run_to_bitmap(
        &outline_pipeline(r##"{"thickness": 2, "color": "#0000ff", "quality": "high"}"##),
        &input,
    );
    assert_eq!(low.as_raw(), high.as_raw());
}

#[test]
fn device_used_reports_the_cpu_fallback() {
    let p = outline_pipeline(r##"{"thickness": 2, "color": "#ff0000"}"##);
    let mut runner = PipelineRunner::new(Capabilities::unavailable());
    runner
        .run(&p, &centered_square(32, 10, 22), None, &RunOptions::default())
        .unwrap();
    assert_eq!(
        runner.node_states()["line"].device_used.as_deref(),
        Some("cpu")
    );
}

#[test]
fn pipeline_json_drives_the_same_result() {
    let json = r##"{
        "version": 1,
        "nodes": [
            {"id": "in", "type": "input", "params": {}},
            {"id": "line", "type": "outline",
             "params": {"thickness": 2, "color": "#ff0000"}},
            {"id": "out", "type": "output", "params": {"format": "png"}}
        ],
        "edges": [
            {"id": "e1", "source": "in", "target": "line"},
            {"id": "e2", "source": "line", "target": "out"}
        ]
    }"##;
    let parsed = pipemagic_core::dsl::load_pipeline_from_str(json).unwrap();
    let programmatic = outline_pipeline(r##"{"thickness": 2, "color": "#ff0000"}"##);

    let input = centered_square(48, 16, 32);
    assert_eq!(
        run_to_bitmap(&parsed, &input).as_raw(),
        run_to_bitmap(&programmatic, &input).as_raw()
    );
}
