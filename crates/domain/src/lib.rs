//! 账户服务核心领域模型
//!
//! 包含账户、一次性令牌、实时推送帧等实体，以及密码策略与存储层抽象。

pub mod account;
pub mod business_rules;
pub mod errors;
pub mod realtime;
pub mod repository;
pub mod token;
pub mod value_objects;

// 重新导出常用类型
pub use account::*;
pub use business_rules::*;
pub use errors::*;
pub use realtime::*;
pub use repository::*;
pub use token::*;
pub use value_objects::*;
