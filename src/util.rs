/// For narrowing casts where business logic ensures that the value is in the narrower
///  type's range.
/// NB: The implementations will panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}

impl PrecheckedCast<u16> for usize {
    fn prechecked_cast(self) -> u16 {
        self.try_into()
            .expect("this is a bug: application logic should have ensured the value range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prechecked_cast_in_range() {
        assert_eq!(PrecheckedCast::<u16>::prechecked_cast(65_535usize), 65_535u16);
    }

    #[test]
    #[should_panic]
    fn test_prechecked_cast_out_of_range() {
        let _: u16 = 65_536usize.prechecked_cast();
    }
}
