use wgpu_deferred::renderer::render_target::{
    AttachmentLayout, GBUFFER_FORMATS, MAX_COLOR_ATTACHMENTS,
};
use wgpu_deferred::renderer::{AttachmentFormat, RenderError};

fn gbuffer_layout(width: u32, height: u32) -> AttachmentLayout {
    let mut layout = AttachmentLayout::new(width, height);
    for format in GBUFFER_FORMATS {
        layout.push_color(format).unwrap();
    }
    layout.set_depth();
    layout
}

#[test]
fn gbuffer_declares_six_draw_buffers() {
    let layout = gbuffer_layout(1280, 720);
    assert_eq!(layout.color_count(), 6);
    assert_eq!(layout.draw_buffers(), &[0, 1, 2, 3, 4, 5]);
    assert!(layout.has_depth());
}

#[test]
fn resize_to_800x600_keeps_every_attachment() {
    let mut layout = gbuffer_layout(1280, 720);
    assert!(layout.resize(800, 600));

    assert_eq!((layout.width(), layout.height()), (800, 600));
    assert_eq!(layout.colors(), &GBUFFER_FORMATS);
    assert_eq!(layout.draw_buffers().len(), 6);
    assert!(layout.has_depth());
    assert_eq!(layout.extent().width, 800);
    assert_eq!(layout.extent().height, 600);
}

#[test]
fn same_size_resize_is_a_no_op() {
    let mut layout = gbuffer_layout(800, 600);
    assert!(!layout.resize(800, 600));
    assert!(!layout.resize(0, 600));
    assert_eq!((layout.width(), layout.height()), (800, 600));
}

#[test]
fn attachment_limit_is_enforced() {
    let mut layout = AttachmentLayout::new(16, 16);
    for _ in 0..MAX_COLOR_ATTACHMENTS {
        layout.push_color(AttachmentFormat::Rgba8).unwrap();
    }
    let err = layout.push_color(AttachmentFormat::Rgba8).unwrap_err();
    assert!(matches!(err, RenderError::AttachmentLimit { limit } if limit == MAX_COLOR_ATTACHMENTS));
    assert_eq!(layout.color_count(), MAX_COLOR_ATTACHMENTS);
}

#[test]
fn float_attachments_store_as_float_textures() {
    assert_eq!(
        AttachmentFormat::Rgba16Float.texture_format(),
        wgpu::TextureFormat::Rgba16Float
    );
    assert_eq!(
        AttachmentFormat::Rgb16Float.texture_format(),
        wgpu::TextureFormat::Rgba16Float
    );
    assert_eq!(
        AttachmentFormat::Rgb8.texture_format(),
        wgpu::TextureFormat::Rgba8Unorm
    );
    assert!(AttachmentFormat::Rgb32Float.is_float());
    assert!(!AttachmentFormat::Rgb8.is_float());
}

#[test]
fn mixed_target_resizes_from_800x600_to_1024x768() {
    let mut layout = AttachmentLayout::new(800, 600);
    layout.push_color(AttachmentFormat::Rgb8).unwrap();
    layout.push_color(AttachmentFormat::Rgba16Float).unwrap();
    assert!(!layout.set_depth());

    assert!(layout.resize(1024, 768));
    assert_eq!(
        layout.colors(),
        &[AttachmentFormat::Rgb8, AttachmentFormat::Rgba16Float]
    );
    assert_eq!(layout.draw_buffers(), &[0, 1]);
    assert!(layout.has_depth());
    assert_eq!((layout.width(), layout.height()), (1024, 768));
}
