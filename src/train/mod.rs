//! Training module for CRF models
//!
//! This module contains all the components needed to train CRF models,
//! including feature generation, the training algorithms and model
//! serialization.

#[macro_use]
mod logging;

mod delta;
mod encoder;
mod feature_gen;
pub(crate) mod model_writer;
mod params;
mod trainer;

pub use self::encoder::{Crf1dEncoder, Encoder};
pub use self::feature_gen::{Feature, FeatureGenerator, FeatureOptions, RefTable};
pub use self::logging::{Logging, MessageCallback};
pub use self::model_writer::ModelWriter;
pub use self::params::{Params, Value};
pub use self::trainer::{Algorithm, Trainer};
