mod encode_test;
mod models_test;
mod replay_test;
mod validate_test;
