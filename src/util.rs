pub(crate) fn is_pow_of_two(val: usize) -> bool {
    if val == 0 {
        return false;
    }
    (val & (val - 1)) == 0
}
