pub mod ledger;
pub mod local_store;
pub mod photo_store;
pub mod position_tracker;
pub mod route_service;
pub mod spot_catalog;
pub mod view_publisher;
