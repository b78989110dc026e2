use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use streetlapse::{
    Alignment, AlignmentState, DescriptorExtractor, FrameAligner, HyperlapseSettings, TransformModel,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

/// A street-like scene of random blocks and discs, larger than one frame.
fn scene(seed: u64) -> RgbImage {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut image = RgbImage::from_pixel(WIDTH + 80, HEIGHT + 80, Rgb([90, 110, 130]));
    for _ in 0..120 {
        let color = Rgb([rng.gen(), rng.gen(), rng.gen()]);
        let x = rng.gen_range(0..(WIDTH + 80) as i32);
        let y = rng.gen_range(0..(HEIGHT + 80) as i32);
        if rng.gen_bool(0.5) {
            let rect = Rect::at(x, y).of_size(rng.gen_range(6..40), rng.gen_range(6..40));
            draw_filled_rect_mut(&mut image, rect, color);
        } else {
            draw_filled_circle_mut(&mut image, (x, y), rng.gen_range(4..20), color);
        }
    }
    image
}

fn view(scene: &RgbImage, x: u32, y: u32) -> RgbImage {
    imageops::crop_imm(scene, x, y, WIDTH, HEIGHT).to_image()
}

#[test]
fn identical_frames_give_the_identity() {
    let settings = HyperlapseSettings::default();
    let extractor = DescriptorExtractor::new(&settings);
    let frame = view(&scene(1), 40, 40);
    let first = extractor.extract(&frame);
    let second = extractor.extract(&frame);
    assert!(!first.is_insufficient());

    let mut aligner = FrameAligner::new(&settings);
    match aligner.align(&first, &second) {
        Alignment::Aligned { transform, inliers, .. } => {
            assert!(transform.distance_to_identity() < 1e-6);
            assert!(inliers >= settings.minimum_matches);
        }
        other => panic!("expected an alignment, got {:?}", other),
    }
}

#[test]
fn camera_shift_is_recovered() {
    for model in [TransformModel::Similarity, TransformModel::Homography] {
        let settings = HyperlapseSettings {
            transform_model: model,
            ..Default::default()
        };
        let extractor = DescriptorExtractor::new(&settings);
        let scene = scene(2);
        let previous = extractor.extract(&view(&scene, 20, 20));
        let current = extractor.extract(&view(&scene, 32, 27));

        let mut aligner = FrameAligner::new(&settings);
        let alignment = aligner.align(&previous, &current);
        assert!(!alignment.is_no_match(), "{:?} did not align", model);
        let transform = alignment.pairwise();
        let centre = transform
            .apply(&cv_core::nalgebra::Point2::new(160.0, 120.0))
            .unwrap();
        assert!((centre.x - 172.0).abs() < 1.0, "{:?}: {:?}", model, centre);
        assert!((centre.y - 127.0).abs() < 1.0, "{:?}: {:?}", model, centre);
        assert!((transform.area_scale() - 1.0).abs() < 0.05);
    }
}

#[test]
fn blank_frames_do_not_match() {
    let settings = HyperlapseSettings::default();
    let extractor = DescriptorExtractor::new(&settings);
    let textured = extractor.extract(&view(&scene(3), 0, 0));
    let blank = extractor.extract(&RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([200, 200, 200])));

    let mut aligner = FrameAligner::new(&settings);
    assert!(aligner.align(&textured, &blank).is_no_match());
    assert!(aligner.align(&blank, &textured).is_no_match());
}

#[test]
fn unrelated_scenes_do_not_match() {
    let settings = HyperlapseSettings::default();
    let extractor = DescriptorExtractor::new(&settings);
    let a = extractor.extract(&view(&scene(4), 0, 0));
    let b = extractor.extract(&view(&scene(5), 0, 0));
    let mut aligner = FrameAligner::new(&settings);
    let alignment = aligner.align(&a, &b);
    assert!(alignment.is_no_match(), "unexpected {:?}", alignment);
}

#[test]
fn the_chain_references_the_first_frame() {
    let settings = HyperlapseSettings::default();
    let extractor = DescriptorExtractor::new(&settings);
    let mut aligner = FrameAligner::new(&settings);
    let scene = scene(6);

    let mut state = AlignmentState::new();
    let mut chain = vec![];
    for offset in [0, 6, 12] {
        let (next, aligned) = aligner.step(state, extractor.extract(&view(&scene, offset, 10)));
        state = next;
        chain.push(aligned);
    }
    assert_eq!(chain[0].alignment, Alignment::Reference);
    assert!(chain.iter().skip(1).all(|frame| !frame.alignment.is_no_match()));
    let origin = chain[2]
        .cumulative
        .apply(&cv_core::nalgebra::Point2::new(0.0, 0.0))
        .unwrap();
    assert!((origin.x - 12.0).abs() < 1.5, "{:?}", origin);
    assert!(origin.y.abs() < 1.5, "{:?}", origin);
}
