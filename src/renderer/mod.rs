pub mod arena;
pub mod batch;
pub mod context;
pub mod cubemap;
pub mod depth;
pub mod error;
pub mod frame;
pub mod instance;
pub mod lights;
pub mod material;
pub mod mesh;
pub mod pipeline_builder;
pub mod postprocess;
pub mod primitives;
pub mod program;
pub mod render_target;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod static_mesh;
pub mod tangents;
pub mod texture;
pub mod uniforms;
pub mod vertex;

pub use arena::{Handle, SlotArena};
pub use batch::InstanceBatch;
pub use context::{request_headless_device, RenderContext};
pub use cubemap::CubeMap;
pub use depth::Depth;
pub use error::RenderError;
pub use frame::{FramePhase, FrameSequencer, FrameTarget, GeometryPass};
pub use instance::{CapacityPolicy, InstanceRecord, InstanceStore, NormalMatrixMode};
pub use lights::{LightHandle, PointLight, PointLightArena};
pub use material::{Material, MaterialHandle, MaterialLibrary};
pub use mesh::{GpuMesh, MeshData, TextureMapType};
pub use pipeline_builder::PipelineBuilder;
pub use postprocess::{BloomChain, BlurSchedule};
pub use program::{ProgramDescriptor, ShaderProgram, UniformKind, UniformValue};
pub use render_target::{AttachmentFormat, RenderTarget};
pub use renderer::Renderer;
pub use static_mesh::StaticMeshAggregator;
pub use texture::GpuTexture;
pub use uniforms::CameraUniform;
pub use vertex::MeshVertex;
