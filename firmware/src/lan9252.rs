//! LAN9252 SPI トランスポート
//!
//! SPI モード0、命令 + 16bit アドレス（ビッグエンディアン）+ データ
//! （リトルエンディアン）の順で転送します。FIFO ポートは32bit単位で読み書きします。

use ecat_servo::bus::EscInterface;
use embassy_stm32::{gpio::Output, mode::Blocking, spi};

const CMD_SERIAL_READ: u8 = 0x03;
const CMD_SERIAL_WRITE: u8 = 0x02;

pub struct Lan9252 {
    spi: spi::Spi<'static, Blocking>,
    cs: Output<'static>,
}

impl Lan9252 {
    /// # 引数
    /// * `spi` - SPI（モード0）
    /// * `cs` - チップセレクト（High で非選択）
    pub fn new(spi: spi::Spi<'static, Blocking>, mut cs: Output<'static>) -> Self {
        cs.set_high();
        Self { spi, cs }
    }

    fn transfer_read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), spi::Error> {
        let [hi, lo] = addr.to_be_bytes();
        self.cs.set_low();
        let result = self
            .spi
            .blocking_write(&[CMD_SERIAL_READ, hi, lo])
            .and_then(|_| self.spi.blocking_read(buf));
        self.cs.set_high();
        result
    }

    fn transfer_write(&mut self, addr: u16, data: &[u8]) -> Result<(), spi::Error> {
        let [hi, lo] = addr.to_be_bytes();
        self.cs.set_low();
        let result = self
            .spi
            .blocking_write(&[CMD_SERIAL_WRITE, hi, lo])
            .and_then(|_| self.spi.blocking_write(data));
        self.cs.set_high();
        result
    }
}

impl EscInterface for Lan9252 {
    type Error = spi::Error;

    fn read_register(&mut self, addr: u16) -> Result<u32, Self::Error> {
        let mut buf = [0u8; 4];
        self.transfer_read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_register(&mut self, addr: u16, value: u32) -> Result<(), Self::Error> {
        self.transfer_write(addr, &value.to_le_bytes())
    }

    fn read_fifo(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        for chunk in buf.chunks_mut(4) {
            let word = self.read_register(addr)?.to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        Ok(())
    }

    fn write_fifo(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_register(addr, u32::from_le_bytes(word))?;
        }
        Ok(())
    }
}
