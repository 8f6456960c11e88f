use nalgebra as na;

pub type Vector2d = na::Vector2<f64>;
pub type Vector3d = na::Vector3<f64>;
pub type Vectord = na::DVector<f64>;

pub type Matrix3d = na::Matrix3<f64>;
pub type Matrix23d = na::Matrix2x3<f64>;
pub type Matrixd = na::DMatrix<f64>;

/// Unit quaternion, Hamilton convention
pub type Quaterniond = na::UnitQuaternion<f64>;

/// Identifier handed out by the feature frontend, stable across images
pub type FeatureId = usize;

pub type ImageShape = (usize, usize);
