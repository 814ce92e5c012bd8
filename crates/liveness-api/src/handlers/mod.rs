pub mod add_service;
pub mod alerting_jobs;
pub mod del_job;
pub mod health;
pub mod receive_alert;
