//! # Model families.
pub mod efficientnet;
pub mod resnet;
pub mod unet;
pub mod vgg;
