#[allow(clippy::module_inception)]
mod engine;
mod message;
mod platform;
pub mod state;

pub use engine::Diagnostics;
pub use engine::Engine;
pub use engine::EngineSettings;
pub use engine::FadeDiagnostics;
pub use engine::FadeReport;
pub use message::FromPlatformMessage;
pub use message::LightCommand;
pub use message::StateChanged;
pub use platform::platforms_from_config;
pub use platform::DevicePlatform;
pub use platform::FromPlatformReceiver;
pub use platform::FromPlatformSender;
pub use platform::PlatformContext;
pub use platform::PlatformFactoryResult;
pub use platform::PlatformRouter;
pub use platform::REGISTRY as PLATFORM_REGISTRY;
pub use state::Capabilities;
pub use state::ColorMode;
pub use state::LightColor;
pub use state::LightSnapshot;
pub use state::LightState;
