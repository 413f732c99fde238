//! 工具箱：Tool trait、注册表、参数校验与内置工具

pub mod echo;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use registry::{Tool, ToolDecl, ToolRegistry};
pub use schema::validate;
