mod tests_logger;
