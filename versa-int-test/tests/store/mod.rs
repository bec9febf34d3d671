mod concurrency_test;
