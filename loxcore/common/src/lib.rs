#[derive(Debug)]
pub struct LoxError(pub String);
impl std::fmt::Display for LoxError { fn fmt(&self, f:&mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) } }
impl std::error::Error for LoxError {}


pub type Result<T> = std::result::Result<T, LoxError>;
