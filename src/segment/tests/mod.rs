mod tests_bloom;
mod tests_get;
mod tests_writer;
