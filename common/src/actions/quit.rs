use bytes::BytesMut;

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::ProtocolError;

/// Both `Quit` and `QuitNc` carry no payload: their entire meaning is in
/// which one-byte code arrives.
macro_rules! empty_frame {
    ($name:ident, $code:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Debug, Default)]
        pub struct $name;

        impl Parsable for $name {
            const CODE: u8 = $code;

            fn parse(_buffer: BytesMut) -> Result<Self, ProtocolError> {
                Ok(Self)
            }
        }

        impl Writable for $name {
            fn write(&self, _buffer: &mut BytesMut) {}

            fn len(&self) -> usize {
                0
            }

            fn code(&self) -> u8 {
                $code
            }

            fn is_empty(&self) -> bool {
                self.len() == 0
            }
        }
    };
}

empty_frame!(Quit, b'Q', "Quit this connection gracefully, ending the whole session.");
empty_frame!(
    QuitNc,
    b'K',
    "This mail transaction is finished; the MTA will reuse the connection for the next one."
);

#[cfg(all(test, feature = "count-allocations"))]
mod test {
    use bytes::BytesMut;

    use crate::decoding::Parsable;

    #[test]
    fn test_parse_quit() {
        use super::Quit;

        let buffer = BytesMut::from("this is quit buffer...");
        let info = allocation_counter::measure(|| {
            let _ = Quit::parse(buffer);
        });
        //No allocation
        assert_eq!(info.count_total, 0);
    }
}
