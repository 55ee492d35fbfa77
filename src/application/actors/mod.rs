pub mod broadcaster;
pub mod call_session_actor;
