pub mod gemini_client;
pub mod quote_http_client;
pub mod twilio_client;
