mod tests_entities;
