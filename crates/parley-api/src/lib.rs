pub mod conversations;
pub mod error;
pub mod groups;
pub mod helpers;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod typing;
pub mod users;
pub mod webhook;
