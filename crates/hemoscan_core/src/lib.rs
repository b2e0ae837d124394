pub mod domain;
pub mod normalize;
pub mod ports;
pub mod synthetic;

pub use domain::{
    AnalysisResult, AnemiaClass, AuthContext, Explanation, FeatureDirection, Gender, ImageBlob,
    ImageFormat, Provenance, QualityFlags, RichPayload, User, UserCredentials,
};
pub use ports::{AnalysisService, KeyValueStore, PortError, PortResult};
