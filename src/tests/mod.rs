mod test_config;
mod test_engine;
mod test_session;
