//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务（凭证与账户），处理输入校验、
//! 错误分类与权限检查，并定义对外部适配器（密码哈希、令牌签发、
//! 邮件发送）的抽象。实时推送中心也位于本层。

pub mod clock;
pub mod denylist;
pub mod dto;
pub mod email;
pub mod error;
pub mod memory;
pub mod password;
pub mod rate_limiter;
pub mod realtime;
pub mod services;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use denylist::TokenDenylist;
pub use dto::{AccountSummary, AuthResult, PageInfo, Paged, TokenPair, TokenValidation};
pub use email::{EmailDispatcher, EmailError, EmailKind, EmailMessage, EmailSender};
pub use error::{ApplicationError, ErrorKind};
pub use memory::InMemoryStore;
pub use password::{PasswordHasher, PasswordHasherError};
pub use rate_limiter::{LoginAttemptLimiter, RateLimitError};
pub use realtime::{
    BroadcastTarget, DeliveryReport, Dispatcher, FrameHandler, Hub, HubError, HubHandle,
    OutboundFrame, Session, SessionInfo,
};
pub use services::{
    AccountService, AccountServiceDependencies, ChangePasswordRequest, CreateAccountRequest,
    CredentialService, CredentialServiceDependencies, LoginRequest, RegisterRequest,
    SearchAccountsRequest, UpdateAccountRequest,
};
pub use token::{IssuedToken, RealtimeSubject, TokenClaims, TokenError, TokenMaker};
