mod tests_sorting;
