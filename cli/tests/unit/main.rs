//! Unit and service-level tests against fake host collaborators.

mod bootstrap_token;
mod deploy_service;
mod mocks;
mod pipeline;
mod prepare;
mod property_tests;
