mod tests_nonzero;
mod tests_reversed;
mod tests_varint;
