pub mod backend;
pub mod host_backend;
pub mod model;
pub mod preprocess;
pub mod tensor;
