pub mod activity;
pub mod dispatcher;
pub mod flows;
