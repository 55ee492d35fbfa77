//! Canned broker lines
//!
//! The broker persona normally speaks through the language model; these
//! templates cover every spot where the model is unavailable or out of
//! retries, so a call never goes silent.

use crate::domain::repositories::broker_model::TradeOutcome;

pub fn fallback_intro(name: &str) -> String {
    format!(
        "Hey {}! Wolf here. The market's lookin' hot today. \
         Your portfolio is holding steady. What stocks are you eyeing today?",
        name
    )
}

pub fn fallback_trade_reply(
    action: &str,
    ticker: &str,
    quantity: i64,
    outcome: &TradeOutcome,
) -> String {
    match outcome {
        TradeOutcome::Executed { price } => format!(
            "Boom! Just {}ed {} shares of {} at ${:.2}. You've got the Midas touch, baby!",
            action, quantity, ticker, price
        ),
        TradeOutcome::Rejected { message } => format!(
            "No dice on that {} {} due to {}. Let's pivot and find you another killer opportunity!",
            ticker, action, message
        ),
    }
}

pub fn fallback_conversation_reply() -> String {
    "The markets have been quite volatile lately. I'd recommend diversifying your portfolio. \
     Anything specific you'd like to know?"
        .to_string()
}

pub fn repeat_prompt() -> String {
    "I didn't catch that. Let me know if you want to buy or sell any stocks today.".to_string()
}

pub fn unknown_caller_reply() -> String {
    "I don't have an account on file for this number. Please register on our website first, \
     then give me a call back."
        .to_string()
}

pub fn connection_trouble_reply() -> String {
    "Sorry, there was a problem connecting to your broker. Please try again later.".to_string()
}

pub fn goodbye() -> String {
    "Thanks for trading with us today. Wolf out!".to_string()
}
