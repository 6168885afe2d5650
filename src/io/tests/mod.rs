mod tests_env;
