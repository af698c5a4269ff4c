pub mod health;
pub use self::health::health;

pub mod auth;
pub use self::auth::login::login;
pub use self::auth::logout;
pub use self::auth::refresh::refresh;
pub use self::auth::register::register;
