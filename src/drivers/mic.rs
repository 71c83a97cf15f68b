// MicDuty — I2S Microphone Driver
//
// Mono 16-bit capture from an I2S MEMS microphone.  Reads never block: each
// call drains whatever the DMA ring already holds, which may be nothing.

use crate::error::DutyResult;

pub trait Microphone {
    fn init(&mut self) -> DutyResult<()>;

    /// Copy up to `buffer.len()` samples.  Returns how many were written;
    /// fewer than requested (including zero) is normal.
    fn read(&mut self, buffer: &mut [i16]) -> usize;

    /// Release the transport.  Safe to call when not initialised.
    fn deinit(&mut self);
}

#[cfg(target_os = "espidf")]
pub use esp::I2sMicrophone;

#[cfg(target_os = "espidf")]
mod esp {
    use core::ffi::c_void;
    use core::ptr;

    use esp_idf_sys::*;

    use super::Microphone;
    use crate::config::*;
    use crate::error::{esp_check, DutyError, DutyResult};

    pub struct I2sMicrophone {
        rx: i2s_chan_handle_t,
    }

    impl I2sMicrophone {
        pub fn new() -> Self {
            Self { rx: ptr::null_mut() }
        }

        fn std_config() -> i2s_std_config_t {
            unsafe {
                i2s_std_config_t {
                    clk_cfg: i2s_std_clk_config_t {
                        sample_rate_hz: SAMPLE_RATE_HZ,
                        clk_src: soc_periph_i2s_clk_src_t_I2S_CLK_SRC_DEFAULT,
                        mclk_multiple: i2s_mclk_multiple_t_I2S_MCLK_MULTIPLE_256,
                        ..core::mem::zeroed()
                    },
                    slot_cfg: i2s_std_slot_config_t {
                        data_bit_width: i2s_data_bit_width_t_I2S_DATA_BIT_WIDTH_16BIT,
                        slot_bit_width: i2s_slot_bit_width_t_I2S_SLOT_BIT_WIDTH_AUTO,
                        slot_mode: i2s_slot_mode_t_I2S_SLOT_MODE_MONO,
                        slot_mask: i2s_std_slot_mask_t_I2S_STD_SLOT_LEFT,
                        ws_width: 16,
                        ws_pol: false,
                        bit_shift: true,
                        ..core::mem::zeroed()
                    },
                    gpio_cfg: i2s_std_gpio_config_t {
                        mclk: gpio_num_t_GPIO_NUM_NC,
                        bclk: PIN_MIC_BCLK,
                        ws: PIN_MIC_WS,
                        dout: gpio_num_t_GPIO_NUM_NC,
                        din: PIN_MIC_DIN,
                        invert_flags: core::mem::zeroed(),
                    },
                }
            }
        }
    }

    impl Default for I2sMicrophone {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Microphone for I2sMicrophone {
        fn init(&mut self) -> DutyResult<()> {
            if !self.rx.is_null() {
                return Ok(());
            }

            let chan_cfg = unsafe {
                i2s_chan_config_t {
                    id: i2s_port_t_I2S_NUM_0,
                    role: i2s_role_t_I2S_ROLE_MASTER,
                    dma_desc_num: I2S_DMA_DESC_NUM,
                    dma_frame_num: I2S_DMA_FRAME_NUM,
                    ..core::mem::zeroed()
                }
            };

            let mut rx: i2s_chan_handle_t = ptr::null_mut();
            esp_check(unsafe { i2s_new_channel(&chan_cfg, ptr::null_mut(), &mut rx) })
                .map_err(|e| DutyError::peripheral("microphone", format!("channel: {}", e)))?;
            self.rx = rx;

            let std_cfg = Self::std_config();
            let ret = esp_check(unsafe { i2s_channel_init_std_mode(self.rx, &std_cfg) })
                .and_then(|_| esp_check(unsafe { i2s_channel_enable(self.rx) }));
            if let Err(e) = ret {
                self.deinit();
                return Err(DutyError::peripheral("microphone", format!("std mode: {}", e)));
            }

            log::info!("Microphone: I2S rx @ {} Hz", SAMPLE_RATE_HZ);
            Ok(())
        }

        fn read(&mut self, buffer: &mut [i16]) -> usize {
            if buffer.is_empty() || self.rx.is_null() {
                return 0;
            }

            let mut bytes_read: usize = 0;
            let ret = unsafe {
                i2s_channel_read(
                    self.rx,
                    buffer.as_mut_ptr() as *mut c_void,
                    core::mem::size_of_val(buffer),
                    &mut bytes_read,
                    MIC_READ_TIMEOUT_TICKS,
                )
            };
            // A timeout just means the DMA ring had less than requested.
            if ret != ESP_OK && ret != ESP_ERR_TIMEOUT {
                log::warn!("i2s read error ({})", ret);
            }
            bytes_read / core::mem::size_of::<i16>()
        }

        fn deinit(&mut self) {
            if self.rx.is_null() {
                return;
            }
            unsafe {
                // Disable fails harmlessly when the channel never got enabled.
                let _ = i2s_channel_disable(self.rx);
                let _ = i2s_del_channel(self.rx);
            }
            self.rx = ptr::null_mut();
        }
    }

    impl Drop for I2sMicrophone {
        fn drop(&mut self) {
            self.deinit();
        }
    }
}
