mod propagation_test;
mod read_only_test;
mod timeout_test;
