#[rocket::launch]
fn launch() -> _ {
    clawlink::rocket()
}
