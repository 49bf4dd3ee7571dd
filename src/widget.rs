use eframe::egui::{Button, Color32, Label, RichText, Rounding};

pub fn get_ecg_value_label(value: Option<i16>) -> Label {
    let text = match value {
        Some(value) => format!("ECG: {value}"),
        None => "ECG: --".to_string(),
    };
    let live_ecg_text = RichText::new(text)
        .color(Color32::RED)
        .background_color(Color32::WHITE)
        .size(40.0);

    Label::new(live_ecg_text)
}

pub fn get_control_button(text: &str) -> Button<'static> {
    let text = RichText::new(text.to_string())
        .color(Color32::WHITE)
        .size(20.0);

    Button::new(text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

pub fn get_active_device_frame(device_name: &str) -> Label {
    let device_text = RichText::new(device_name)
        .color(Color32::WHITE)
        .background_color(Color32::RED)
        .size(20.0);

    Label::new(device_text)
}

pub fn get_disconnect_device_button() -> Button<'static> {
    let text = RichText::new("DC")
        .color(Color32::RED)
        .background_color(Color32::WHITE)
        .size(20.0);

    Button::new(text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

pub fn get_status_label(message: &str, is_error: bool) -> Label {
    let color = if is_error { Color32::RED } else { Color32::GREEN };
    Label::new(RichText::new(message).color(color).size(16.0))
}
