//! 三个相互独立的取证信号提取器
//!
//! 它们只读同一份指纹 + 元数据快照，没有执行顺序，也不共享可变状态，
//! 可以并发运行。任何一个失败都只会降级成“不可用”信号。

pub mod frame_rate;
pub mod portrait;
pub mod weather;

pub use frame_rate::{FrameRateConsistencyChecker, FrameRateOutcome, FrameRateReport};
pub use portrait::{PortraitAdjustment, PortraitDetection, PortraitModeAdjuster};
pub use weather::{
    GeoPoint, WeatherCheck, WeatherConsistencyChecker, WeatherError, WeatherObservation,
    WeatherProvider,
};
