use nom::IResult;

/// Big-endian wire parsing for a type.
pub trait ParseBe<T> {
    fn parse_be(input: &[u8]) -> IResult<&[u8], T>;
}
